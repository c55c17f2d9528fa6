//! OpenWaiterAI CLI
//!
//! 入口：初始化日志、加载配置、装配运行时，然后逐行读取顾客输入并打印每次交换的输出。
//! 用法：openwaiter [config.toml]

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures_util::StreamExt;
use openwaiter::agent::{create_runtime, AgentRuntime};
use openwaiter::config::load_config;
use openwaiter::core::{run_with_graceful_shutdown, ExchangeItem, ShutdownManager, ShutdownReason};
use openwaiter::observability;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let runtime = create_runtime(&cfg)
        .await
        .context("Failed to create runtime")?;

    let manager = Arc::new(ShutdownManager::new());
    let coordinator = runtime.shutdown_coordinator(manager.clone());

    println!("Welcome to the OpenWaiterAI CLI!");
    let lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    let reason = run_with_graceful_shutdown(coordinator, repl(&runtime, &manager, lines)).await;
    if let Some(ShutdownReason::FatalError(e)) = reason {
        anyhow::bail!("Shut down after fatal error: {}", e);
    }
    Ok(())
}

/// 在独立线程上逐行读取输入，关闭流程不等待阻塞中的读取
fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<std::io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in reader.lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

async fn repl(
    runtime: &AgentRuntime,
    manager: &ShutdownManager,
    mut lines: mpsc::UnboundedReceiver<std::io::Result<String>>,
) {
    let mut stdout = tokio::io::stdout();

    loop {
        let _ = stdout.write_all(b"You: ").await;
        let _ = stdout.flush().await;

        let line = match lines.recv().await {
            Some(Ok(line)) => line,
            None => break,
            Some(Err(e)) => {
                tracing::error!("Failed to read stdin: {}", e);
                manager.shutdown(ShutdownReason::FatalError(e.to_string()));
                return;
            }
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let mut items = runtime.invoke(input, manager.exchange_token());
        while let Some(item) = items.next().await {
            match item {
                Ok(item) => print_item(&item),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    manager.shutdown(ShutdownReason::UserInitiated);
}

fn print_item(item: &ExchangeItem) {
    match item {
        ExchangeItem::Ai { message } => {
            if !message.content.is_empty() {
                println!("AI: {}", message.content);
            }
            for call in &message.tool_calls {
                println!("  -> {} {}", call.name, call.args);
            }
        }
        ExchangeItem::ToolResult { result } => {
            let marker = if result.is_error { "!" } else { "" };
            println!("  [{}{}] {}", result.tool_name, marker, result.content);
        }
        ExchangeItem::UnknownTool { name, .. } => {
            println!("  [{} is not available, skipped]", name);
        }
    }
}
