//! Terminal chat transport.

use std::io::{self, BufRead, Write};

use runtime::{Backend, Event, EventSink, Orchestrator};

/// Prints lifecycle events as they arrive.
pub struct ConsolePrinter;

impl EventSink for ConsolePrinter {
    async fn emit(&self, event: Event) {
        match event {
            Event::ToolStart { tool, args, .. } => println!("  -> {tool} {args}"),
            Event::ToolEnd {
                tool,
                error: Some(error),
                ..
            } => println!("  x  {tool}: {error}"),
            Event::ToolEnd { tool, result, .. } => {
                println!("  <- {tool} ({} chars)", result.chars().count())
            }
            Event::AssistantMessage { content } => println!("\n{content}\n"),
            Event::ErrorNotice { content } => eprintln!("Error: {content}\n"),
        }
    }
}

/// Read lines from stdin until `quit`, `exit` or EOF, one turn per line.
pub async fn run<B: Backend>(orchestrator: &Orchestrator<B>) -> io::Result<()> {
    println!("Type 'quit' or Ctrl+D to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut history = Vec::new();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        // Failures were already printed through the sink.
        if let Err(e) = orchestrator.run(input, &mut history, &ConsolePrinter).await {
            tracing::debug!(error = %e, "turn ended without an answer");
        }
    }

    Ok(())
}
