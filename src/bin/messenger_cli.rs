use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use classroom_messenger::{
    ConversationId, InMemoryDirectory, Messenger, MessengerConfig, NotificationCategory,
};

/// Command-line access to a classroom messenger data directory
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Directory for application data
    #[clap(long, value_name = "PATH", env = "MESSENGER_DATA_DIR")]
    data_dir: PathBuf,

    /// Directory for application logs
    #[clap(long, value_name = "PATH", env = "MESSENGER_LOGS_DIR")]
    logs_dir: PathBuf,

    /// JSON file with the participant directory (array of {userId, name, role, groupId})
    #[clap(long, value_name = "FILE", env = "MESSENGER_DIRECTORY")]
    directory: Option<PathBuf>,

    /// Only allow direct messages between users of the same group
    #[clap(long)]
    require_shared_group: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a direct message
    Send {
        #[clap(long)]
        from: String,
        #[clap(long)]
        to: String,
        body: String,
    },
    /// Print a conversation as JSON
    History {
        #[clap(long)]
        conversation: String,
    },
    /// Toggle a reaction on a message
    React {
        #[clap(long)]
        user: String,
        #[clap(long)]
        conversation: String,
        #[clap(long)]
        message: String,
        emoji: String,
    },
    /// Edit one of your own messages
    Edit {
        #[clap(long)]
        user: String,
        #[clap(long)]
        conversation: String,
        #[clap(long)]
        message: String,
        body: String,
    },
    /// Mark a message read, or everything with --all
    Read {
        #[clap(long)]
        user: String,
        #[clap(long, requires = "message")]
        conversation: Option<String>,
        #[clap(long)]
        message: Option<String>,
        #[clap(long, conflicts_with_all = ["conversation", "message"])]
        all: bool,
    },
    /// Show unread counts and items for a user
    Unread {
        #[clap(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let directory = match &args.directory {
        Some(path) => InMemoryDirectory::from_json_file(path)
            .with_context(|| format!("Failed to load directory from {:?}", path))?,
        None => InMemoryDirectory::new(),
    };

    let config = MessengerConfig::new(&args.data_dir, &args.logs_dir)
        .with_require_shared_group(args.require_shared_group);
    let messenger = match Messenger::initialize(config, Arc::new(directory)).await {
        Ok(messenger) => messenger,
        Err(err) => {
            eprintln!("Failed to initialize messenger: {}", err);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Send { from, to, body } => {
            let message = messenger
                .send_message(&from, &[from.as_str(), to.as_str()], &body)
                .await?;
            let conversation_id = ConversationId::derive(&[&from, &to])?;
            println!("{} {}", conversation_id, message.message_id);
        }
        Command::History { conversation } => {
            let conversation = messenger
                .get_conversation(&ConversationId::from_external(conversation))
                .await?;
            println!("{}", serde_json::to_string_pretty(&conversation)?);
        }
        Command::React {
            user,
            conversation,
            message,
            emoji,
        } => {
            let change = messenger
                .react_to_message(
                    &user,
                    &ConversationId::from_external(conversation),
                    &message,
                    &emoji,
                )
                .await?;
            println!("{}", serde_json::to_string(&change)?);
        }
        Command::Edit {
            user,
            conversation,
            message,
            body,
        } => {
            let edited = messenger
                .edit_message(
                    &user,
                    &ConversationId::from_external(conversation),
                    &message,
                    &body,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&edited)?);
        }
        Command::Read {
            user,
            conversation,
            message,
            all,
        } => {
            if all {
                let marked = messenger.acknowledge_all(&user).await?;
                println!("marked {} messages read", marked);
            } else if let (Some(conversation), Some(message)) = (conversation, message) {
                let changed = messenger
                    .acknowledge(&user, &ConversationId::from_external(conversation), &message)
                    .await?;
                println!("{}", if changed { "marked read" } else { "already read" });
            } else {
                anyhow::bail!("either --all or --conversation with --message is required");
            }
        }
        Command::Unread { user } => {
            let projector = messenger.project_notifications(&user).await?;
            println!("{}", serde_json::to_string_pretty(&projector.summary())?);
            for category in NotificationCategory::ALL {
                for item in projector.unread_items(category) {
                    println!(
                        "[{:?}] {} {} {}: {}",
                        category, item.timestamp, item.conversation_id, item.sender, item.excerpt
                    );
                }
            }
        }
    }

    Ok(())
}
