//! 会话存储
//!
//! 进程内唯一的会话表：session_id -> Session。首次访问时创建并写入一条 system 消息；
//! 每个会话有独立的互斥锁，同一会话的交换串行执行，不同会话互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::core::AgentError;
use crate::memory::{Message, Role};

/// 会话 ID
pub type SessionId = String;

/// 单个会话：以 system 消息开头、只追加的消息序列
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    messages: Vec<Message>,
    pub created_at: Instant,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, system_prompt: &str) -> Self {
        Self {
            id: id.into(),
            messages: vec![Message::system(system_prompt)],
            created_at: Instant::now(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 追加消息；拒绝第二条 system 消息，以及无法对应上一条 ai 消息请求的 tool 消息
    pub fn push(&mut self, message: Message) -> Result<(), AgentError> {
        match message.role {
            Role::System => {
                return Err(self.invalid("session already has a system message"));
            }
            Role::Tool => {
                let call_id = message
                    .tool_call_id
                    .as_deref()
                    .ok_or_else(|| self.invalid("tool message without call id"))?;
                // tool 消息只能跟在 ai 消息（或同一轮的其他 tool 消息）之后
                let requested = self
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role != Role::Tool)
                    .filter(|m| m.role == Role::Ai)
                    .map(|m| m.tool_calls.iter().any(|tc| tc.id == call_id))
                    .unwrap_or(false);
                if !requested {
                    return Err(self.invalid(&format!(
                        "tool result {call_id} does not answer the preceding ai message"
                    )));
                }
                let answered = self
                    .messages
                    .iter()
                    .rev()
                    .take_while(|m| m.role == Role::Tool)
                    .any(|m| m.tool_call_id.as_deref() == Some(call_id));
                if answered {
                    return Err(self.invalid(&format!("tool call {call_id} already has a result")));
                }
            }
            Role::Human | Role::Ai => {}
        }
        self.messages.push(message);
        Ok(())
    }

    /// 整批追加：任一条被拒绝时回滚本批，会话保持调用前的状态
    pub fn push_all(&mut self, messages: Vec<Message>) -> Result<(), AgentError> {
        let mark = self.messages.len();
        for message in messages {
            if let Err(e) = self.push(message) {
                self.messages.truncate(mark);
                return Err(e);
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> AgentError {
        AgentError::InvalidMessage {
            session_id: self.id.clone(),
            reason: reason.to_string(),
        }
    }
}

/// 会话管理器：启动时创建一次，以引用传给编排器；关闭时 clear
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    system_prompt: String,
}

impl SessionManager {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取或创建会话；新会话已含 system 消息
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id, "Creating session");
                Arc::new(Mutex::new(Session::new(session_id, &self.system_prompt)))
            })
            .clone()
    }

    /// 独占会话直到 guard 释放（一次交换期间持有）
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<Session> {
        self.get_or_create(session_id).await.lock_owned().await
    }

    /// 追加消息；会话不存在时返回 UnknownSession
    pub async fn append(&self, session_id: &str, message: Message) -> Result<(), AgentError> {
        let session = self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownSession(session_id.to_string()))?;
        let mut session = session.lock().await;
        session.push(message)
    }

    /// 会话消息快照
    pub async fn messages(&self, session_id: &str) -> Option<Vec<Message>> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        let session = session.lock().await;
        Some(session.messages().to_vec())
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 关闭时清空会话表，返回清除的会话数
    pub async fn clear(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let n = sessions.len();
        sessions.clear();
        n
    }
}
