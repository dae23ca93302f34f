//! `scribe complete` -- send one prompt and print the generated text.
//!
//! The async path is subject to admission control and can be interrupted
//! with Ctrl-C. The `--sync` path runs the blocking gateway on a
//! dedicated thread.

use clap::Args;
use scribe_llm::Settings;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{PromptArgs, build_gateway, build_request};

/// Arguments for the `complete` subcommand.
#[derive(Args, Debug)]
pub struct CompleteArgs {
    #[command(flatten)]
    pub prompt: PromptArgs,
}

/// Run the `complete` subcommand.
pub async fn run(args: CompleteArgs, settings: Settings) -> anyhow::Result<()> {
    let request = build_request(&args.prompt, &settings)?;
    debug!(model = %request.model, sync = args.prompt.sync, "completing");

    let text = if args.prompt.sync {
        tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let gateway = build_gateway(&settings)?;
            Ok(gateway.complete_sync(&request)?)
        })
        .await??
    } else {
        let gateway = build_gateway(&settings)?;
        let cancel = cancel_on_ctrl_c();
        gateway.complete_async_with_cancel(&request, &cancel).await?
    };

    println!("{text}");
    Ok(())
}

/// A token cancelled when the process receives Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_token_starts_live() {
        let cancel = cancel_on_ctrl_c();
        assert!(!cancel.is_cancelled());
        let child = cancel.child_token();
        cancel.cancel();
        assert!(child.is_cancelled());
    }
}
