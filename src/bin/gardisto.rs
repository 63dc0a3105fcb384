use anyhow::Result;
use gardisto::cli::{actions, actions::Action, start};

// Main function
#[tokio::main]
async fn main() -> Result<()> {
    // Start the program
    let action = start()?;

    // Handle the action
    match action {
        Action::Worker { .. } => actions::worker::handle(action).await?,
    }

    Ok(())
}
