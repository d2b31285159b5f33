mod storage;

use std::path::PathBuf;

use anyhow::{bail, Context};
use branch_manager::{
    BranchConfig, BranchGraph, BranchId, BranchOutcome, Conversation, CreateBranchOptions,
    CreateBranchRequest, DeletePolicy, Message, MessageId, ModelRef,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::storage::{ConversationStorage, FileConversationStorage};

#[derive(Parser)]
#[command(name = "branch-cli")]
#[command(about = "Drive a branching conversation stored on disk")]
#[command(version)]
struct Cli {
    /// Directory holding conversation files
    #[arg(long, env = "BRANCH_DATA_DIR", default_value = ".branches")]
    data_dir: PathBuf,

    #[arg(long, short, default_value = "default")]
    conversation: String,

    /// Branch settings file (.toml or .json); environment overrides still apply
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty conversation
    Init,
    /// Append a user message to a branch
    Send {
        text: String,
        #[arg(long, short, default_value = "main")]
        branch: String,
    },
    /// Stream an AI reply into a branch, one word per chunk
    Reply {
        text: String,
        #[arg(long, short)]
        model: String,
        #[arg(long, short, default_value = "main")]
        branch: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Fork branches from a message
    Branch {
        message_id: String,
        #[arg(long, short, default_value = "main")]
        parent: String,
        /// One branch per AI response to a user message
        #[arg(long)]
        multi: bool,
        /// Selected models as `id` or `id=Display Name`, comma separated
        #[arg(long, value_delimiter = ',')]
        models: Vec<String>,
        #[arg(long)]
        allow_duplicate: bool,
        #[arg(long)]
        group: Option<String>,
    },
    /// Print the display context of a branch
    Show {
        #[arg(default_value = "main")]
        branch: String,
    },
    /// Print the branch hierarchy
    Tree,
    /// Delete a branch record
    Delete {
        branch: String,
        /// reject, reparent or cascade; defaults to the configured policy
        #[arg(long)]
        policy: Option<DeletePolicy>,
    },
    /// Drop messages no branch references
    Gc,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
                .with_file(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = match &cli.config {
        Some(path) => BranchConfig::load(path)
            .with_context(|| format!("loading branch config from {}", path.display()))?,
        None => BranchConfig::from_env()?,
    };
    tracing::debug!(?config, data_dir = %cli.data_dir.display(), "branch-cli: starting");

    let storage = FileConversationStorage::new(&cli.data_dir);

    if let Commands::Init = cli.command {
        storage.create(&Conversation::new(cli.conversation.as_str()).to_state()).await?;
        println!("{}", format!("Created conversation {}", cli.conversation).green());
        return Ok(());
    }

    let state = storage
        .load(&cli.conversation)
        .await
        .with_context(|| format!("run `branch-cli -c {} init` first", cli.conversation))?;
    let conversation = Conversation::from_state(state, config);

    let dirty = run(&conversation, cli.command)?;
    if dirty {
        storage.save(&conversation.to_state()).await?;
    }
    Ok(())
}

/// Execute one command. Returns whether the conversation changed.
fn run(conversation: &Conversation, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Init => Ok(false),
        Commands::Send { text, branch } => {
            let branch = BranchId::new(branch);
            let message = Message::user(MessageId::generate(), text);
            let id = message.id.clone();
            conversation.append_message(&branch, message)?;
            println!("{} {}", "user".cyan(), id);
            Ok(true)
        }
        Commands::Reply {
            text,
            model,
            branch,
            group,
        } => {
            let branch = BranchId::new(branch);
            let id = conversation.begin_response(&branch, model.as_str(), group)?;
            for (i, word) in text.split_whitespace().enumerate() {
                let chunk = if i == 0 { word.to_string() } else { format!(" {word}") };
                conversation.append_chunk(&id, &chunk)?;
            }
            if conversation.messages().get(&id).is_some_and(|m| m.text().is_empty()) {
                conversation.cancel_response(&branch, &id)?;
                bail!("empty reply discarded");
            }
            conversation.finalize_response(&id)?;
            println!("{} {}", model.magenta(), id);
            Ok(true)
        }
        Commands::Branch {
            message_id,
            parent,
            multi,
            models,
            allow_duplicate,
            group,
        } => {
            let mut options = CreateBranchOptions::new().with_models(models.iter().map(|m| parse_model(m)));
            if allow_duplicate {
                options = options.allow_duplicate();
            }
            if let Some(group) = group {
                options = options.with_group(group);
            }
            let request = if multi {
                CreateBranchRequest::multi(parent, message_id)
            } else {
                CreateBranchRequest::single(parent, message_id)
            }
            .with_options(options);

            let outcome = conversation.create_branch(&request);
            print_outcome(&outcome);
            Ok(!outcome.created_branch_ids.is_empty())
        }
        Commands::Show { branch } => {
            let branch = BranchId::new(branch);
            if conversation.branch(&branch).is_none() {
                bail!("branch {branch} not found");
            }
            for message in conversation.display_context(&branch) {
                let who = match message.model() {
                    Some(model) => model.magenta(),
                    None => "user".cyan(),
                };
                let marker = if message.is_streaming() { " …".dimmed() } else { "".normal() };
                println!("{} {} {}{}", message.id.to_string().dimmed(), who, message.text(), marker);
            }
            Ok(false)
        }
        Commands::Tree => {
            print_tree(conversation, &conversation.graph());
            Ok(false)
        }
        Commands::Delete { branch, policy } => {
            let branch = BranchId::new(branch);
            let policy = policy.unwrap_or(conversation.config().delete_policy);
            let removed = conversation.delete_branch_with(&branch, policy)?;
            for id in &removed {
                println!("{} {}", "deleted".red(), id);
            }
            Ok(true)
        }
        Commands::Gc => {
            let removed = conversation.collect_garbage();
            println!("{}", format!("Removed {removed} unreferenced messages").yellow());
            Ok(removed > 0)
        }
    }
}

/// `id` or `id=Display Name`.
fn parse_model(raw: &str) -> ModelRef {
    match raw.split_once('=') {
        Some((id, name)) => ModelRef::new(id.trim(), name.trim()),
        None => ModelRef::new(raw.trim(), raw.trim()),
    }
}

fn print_outcome(outcome: &BranchOutcome) {
    for id in &outcome.created_branch_ids {
        println!("{} {}", "created".green(), id);
    }
    for id in &outcome.existing_branch_ids {
        println!("{} {}", "existing".yellow(), id);
    }
    if let Some(rejection) = outcome.rejected {
        println!("{} {:?}", "rejected".red(), rejection);
    }
    tracing::debug!(phase = ?outcome.phase, "branch-cli: creation finished");
}

fn print_tree(conversation: &Conversation, graph: &BranchGraph) {
    let mut stack: Vec<&BranchId> = graph.roots().iter().rev().collect();
    while let Some(id) = stack.pop() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let ctx = conversation.branch(id);
        let models = ctx
            .as_ref()
            .map(|c| c.metadata.models.iter().map(|m| m.id.as_str()).collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        let count = ctx.as_ref().map(|c| c.message_count()).unwrap_or_default();
        println!(
            "{}{} {} {}",
            "  ".repeat(node.depth),
            id.to_string().bold(),
            format!("({count} messages)").dimmed(),
            models.magenta()
        );
        stack.extend(node.children.iter().rev());
    }
    for anomaly in graph.anomalies() {
        println!("{} {}", "warning".yellow(), anomaly);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation::new("cli")
    }

    #[test]
    fn parse_model_accepts_display_name() {
        assert_eq!(parse_model("gpt=GPT-4o"), ModelRef::new("gpt", "GPT-4o"));
        assert_eq!(parse_model(" claude "), ModelRef::new("claude", "claude"));
    }

    #[test]
    fn send_reply_and_branch() {
        let conversation = conversation();
        assert!(run(
            &conversation,
            Commands::Send {
                text: "hello".to_string(),
                branch: "main".to_string(),
            }
        )
        .unwrap());
        assert!(run(
            &conversation,
            Commands::Reply {
                text: "hi  there".to_string(),
                model: "gpt".to_string(),
                branch: "main".to_string(),
                group: None,
            }
        )
        .unwrap());

        let context = conversation.display_context(&BranchId::main());
        assert_eq!(context[1].text(), "hi there");
        assert!(!context[1].is_streaming());

        let user_id = context[0].id.to_string();
        let created = run(
            &conversation,
            Commands::Branch {
                message_id: user_id.clone(),
                parent: "main".to_string(),
                multi: false,
                models: vec!["gpt".to_string()],
                allow_duplicate: false,
                group: None,
            },
        )
        .unwrap();
        assert!(created);
        assert_eq!(conversation.branches().len(), 2);

        let again = run(
            &conversation,
            Commands::Branch {
                message_id: user_id,
                parent: "main".to_string(),
                multi: false,
                models: Vec::new(),
                allow_duplicate: false,
                group: None,
            },
        )
        .unwrap();
        assert!(!again);
    }

    #[test]
    fn empty_reply_is_discarded() {
        let conversation = conversation();
        let result = run(
            &conversation,
            Commands::Reply {
                text: "   ".to_string(),
                model: "gpt".to_string(),
                branch: "main".to_string(),
                group: None,
            },
        );
        assert!(result.is_err());
        assert!(conversation.display_context(&BranchId::main()).is_empty());
    }

    #[test]
    fn show_unknown_branch_fails() {
        let result = run(&conversation(), Commands::Show { branch: "nope".to_string() });
        assert!(result.is_err());
    }
}
