//! 系统提示加载：内联配置优先，否则读取文件

use crate::config::AppSection;
use crate::core::AgentError;

pub fn load_system_prompt(app: &AppSection) -> Result<String, AgentError> {
    if let Some(inline) = app.system_prompt.as_ref().filter(|s| !s.trim().is_empty()) {
        return Ok(inline.clone());
    }
    let path = &app.system_prompt_path;
    let prompt = std::fs::read_to_string(path).map_err(|e| {
        AgentError::ConfigError(format!(
            "cannot read system prompt {}: {}",
            path.display(),
            e
        ))
    })?;
    tracing::debug!(path = %path.display(), chars = prompt.chars().count(), "Loaded system prompt");
    Ok(prompt)
}
