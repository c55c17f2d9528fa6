//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `OPENWAITER__*` 覆盖（双下划线表示嵌套，如 `OPENWAITER__QUERY__TIMEOUT_SECS=10`）。
//! 数据库连接未显式配置时，由 `OPENWAITERAI_DB_*` 环境变量拼出 PostgreSQL URL。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::OrchestratorConfig;
use crate::llm::OpenAiSettings;
use crate::tools::CorrelatorConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub query: QuerySection,
    pub agent: AgentSection,
    pub database: DatabaseSection,
    pub tools: ToolsSection,
}

/// [app] 段：会话 ID 与系统提示来源
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 单用户 CLI 使用的固定会话 ID
    pub session_id: String,
    /// 系统提示文件
    pub system_prompt_path: PathBuf,
    /// 直接内联的系统提示，优先于文件
    pub system_prompt: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            session_id: "openwaiterai".to_string(),
            system_prompt_path: PathBuf::from("system_instructions.txt"),
            system_prompt: None,
        }
    }
}

/// [llm] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 可重试错误的额外尝试次数
    pub retry_budget: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            temperature: 1.0,
            max_tokens: 4096,
            retry_budget: 2,
            request_timeout_secs: 60,
        }
    }
}

impl LlmSection {
    pub fn to_settings(&self, api_key: Option<String>) -> OpenAiSettings {
        OpenAiSettings {
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            api_key,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// [query] 段：顾客问题的轮询等待
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    pub timeout_secs: f64,
    pub poll_interval_secs: f64,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            timeout_secs: 30.0,
            poll_interval_secs: 1.0,
        }
    }
}

impl QuerySection {
    pub fn correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig::from_secs_f64(self.timeout_secs, self.poll_interval_secs)
    }
}

/// [agent] 段：工具轮数上限与单次交换时限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_tool_rounds: usize,
    pub exchange_timeout_secs: Option<f64>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            exchange_timeout_secs: None,
        }
    }
}

impl AgentSection {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_tool_rounds: self.max_tool_rounds,
            exchange_timeout: self
                .exchange_timeout_secs
                .and_then(|s| Duration::try_from_secs_f64(s).ok()),
        }
    }
}

/// [database] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// 完整连接 URL（postgres:// 或 sqlite:）；未设置时读取 OPENWAITERAI_DB_* 环境变量
    pub url: Option<String>,
    pub table: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            table: crate::store::DEFAULT_TABLE.to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseSection {
    pub fn database_url(&self) -> String {
        self.resolve_url(|key| std::env::var(key).ok())
    }

    fn resolve_url(&self, env: impl Fn(&str) -> Option<String>) -> String {
        if let Some(url) = self.url.as_ref().filter(|u| !u.trim().is_empty()) {
            return url.clone();
        }
        let get = |key: &str, default: &str| env(key).unwrap_or_else(|| default.to_string());
        format!(
            "postgres://{}:{}@{}:{}/{}",
            get("OPENWAITERAI_DB_USER", "user"),
            get("OPENWAITERAI_DB_PASSWORD", "password"),
            get("OPENWAITERAI_DB_HOST", "localhost"),
            get("OPENWAITERAI_DB_PORT", "5432"),
            get("OPENWAITERAI_DB_NAME", "example"),
        )
    }
}

/// [tools] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 是否向模型开放直接执行 SQL 的工具
    pub sql_query_enabled: bool,
}

/// 从 config 目录加载配置，环境变量 OPENWAITER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 OPENWAITER__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("OPENWAITER")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
