//! `scribe stream` -- send one prompt and print text deltas as they arrive.

use std::io::Write;

use clap::Args;
use scribe_llm::{Settings, StreamEvent};
use tracing::debug;

use super::{PromptArgs, build_gateway, build_request};

/// Arguments for the `stream` subcommand.
#[derive(Args, Debug)]
pub struct StreamArgs {
    #[command(flatten)]
    pub prompt: PromptArgs,
}

/// Run the `stream` subcommand.
pub async fn run(args: StreamArgs, settings: Settings) -> anyhow::Result<()> {
    let request = build_request(&args.prompt, &settings)?;
    debug!(model = %request.model, sync = args.prompt.sync, "streaming");

    if args.prompt.sync {
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let gateway = build_gateway(&settings)?;
            for event in gateway.stream_sync(&request)? {
                print_delta(&event?);
            }
            Ok(())
        })
        .await??;
    } else {
        let gateway = build_gateway(&settings)?;
        gateway
            .stream_async(&request, |event| print_delta(&event))
            .await?;
    }

    println!();
    Ok(())
}

/// Print the text carried by `event`, if any.
fn print_delta(event: &StreamEvent) {
    if let Some(text) = event.text() {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}
