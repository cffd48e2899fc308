use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cachekeeper")]
#[command(author, version, about = "Terminal agent with prompt-cache aware conversation logs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive session, optionally resuming a saved conversation
    Chat {
        /// Conversation file to resume (name inside the logs directory)
        #[arg(short, long, conflicts_with = "new")]
        resume: Option<String>,

        /// Start a fresh conversation without offering to resume
        #[arg(short, long)]
        new: bool,
    },

    /// List the most recent saved conversations
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show statistics and the latest messages of one saved conversation
    Show {
        /// Conversation file name, or its number in `list`
        conversation: String,
    },

    /// Remove redundant cache markers from saved conversations
    Clean {
        /// Only clean this conversation file
        file: Option<String>,
    },
}
