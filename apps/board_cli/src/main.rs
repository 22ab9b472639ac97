use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{load_settings, normalize_api_url, KanbanClient};
use serde::Serialize;
use shared::{
    domain::{BoardId, ColumnId, TaskId},
    protocol::{BoardDraft, ColumnDraft, TaskDraft, TaskPatch},
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "board", about = "Kanban board client")]
struct Cli {
    /// Settings file; defaults to kanban.toml in the working directory.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Boards,
    /// Shows a board with the tasks of every column.
    Board {
        board_id: String,
    },
    CreateBoard {
        name: String,
    },
    RenameBoard {
        board_id: String,
        name: String,
    },
    DeleteBoard {
        board_id: String,
    },
    AddColumn {
        board_id: String,
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    EditColumn {
        column_id: String,
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    DeleteColumn {
        column_id: String,
    },
    Tasks {
        column_id: String,
    },
    AddTask {
        column_id: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    EditTask {
        task_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    DeleteTask {
        task_id: String,
    },
    MoveTask {
        task_id: String,
        column_id: String,
        #[arg(long, default_value_t = 0)]
        order: usize,
    },
    /// Puts the listed tasks first, in the given order.
    Reorder {
        column_id: String,
        #[arg(required = true)]
        task_ids: Vec<String>,
    },
    Comment {
        column_id: String,
        task_id: String,
        text: String,
        #[arg(long = "as")]
        author: Option<String>,
    },
    SignIn {
        token: String,
    },
    SignOut,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(api_url) = &cli.api_url {
        settings.api_url = normalize_api_url(api_url)?;
    }
    debug!(api_url = %settings.api_url, "settings loaded");
    let client = KanbanClient::from_settings(&settings).context("failed to start client")?;

    match cli.command {
        Command::Boards => print_json(&client.fetch_boards().await?)?,
        Command::Board { board_id } => {
            let (board, columns) = client.open_board(&BoardId::new(board_id)).await?;
            println!("{} ({})", board.name, board.id);
            let store = client.snapshot().await;
            for (column, (_, fetched)) in board.columns.iter().zip(&columns) {
                println!("\n[{}] {} {}", column.id, column.name, column.color);
                match fetched {
                    Ok(()) => {
                        for task in store.tasks(&column.id) {
                            println!("  {} {}", task.id, task.title);
                        }
                    }
                    Err(err) => println!("  (tasks unavailable: {err})"),
                }
            }
        }
        Command::CreateBoard { name } => {
            print_json(&client.create_board(BoardDraft { name }).await?)?
        }
        Command::RenameBoard { board_id, name } => print_json(
            &client
                .update_board(&BoardId::new(board_id), BoardDraft { name })
                .await?,
        )?,
        Command::DeleteBoard { board_id } => {
            client.delete_board(&BoardId::new(board_id)).await?;
            println!("deleted");
        }
        Command::AddColumn {
            board_id,
            name,
            color,
        } => {
            let color = color.unwrap_or_else(|| settings.default_column_color.clone());
            print_json(
                &client
                    .create_column(&BoardId::new(board_id), ColumnDraft { name, color })
                    .await?,
            )?
        }
        Command::EditColumn {
            column_id,
            name,
            color,
        } => {
            let color = color.unwrap_or_else(|| settings.default_column_color.clone());
            print_json(
                &client
                    .update_column(&ColumnId::new(column_id), ColumnDraft { name, color })
                    .await?,
            )?
        }
        Command::DeleteColumn { column_id } => {
            client.delete_column(&ColumnId::new(column_id)).await?;
            println!("deleted");
        }
        Command::Tasks { column_id } => {
            print_json(&client.fetch_tasks_by_column(&ColumnId::new(column_id)).await?)?
        }
        Command::AddTask {
            column_id,
            title,
            description,
        } => print_json(
            &client
                .create_task(&ColumnId::new(column_id), TaskDraft { title, description })
                .await?,
        )?,
        Command::EditTask {
            task_id,
            title,
            description,
        } => {
            if title.is_none() && description.is_none() {
                bail!("nothing to change; pass --title and/or --description");
            }
            let patch = TaskPatch {
                title,
                description,
                ..TaskPatch::default()
            };
            print_json(&client.update_task(&TaskId::new(task_id), patch).await?)?
        }
        Command::DeleteTask { task_id } => {
            client.delete_task(&TaskId::new(task_id)).await?;
            println!("deleted");
        }
        Command::MoveTask {
            task_id,
            column_id,
            order,
        } => print_json(
            &client
                .move_task(&TaskId::new(task_id), &ColumnId::new(column_id), order)
                .await?,
        )?,
        Command::Reorder {
            column_id,
            task_ids,
        } => {
            let column_id = ColumnId::new(column_id);
            let task_ids = task_ids.into_iter().map(TaskId::new).collect();
            client.fetch_tasks_by_column(&column_id).await?;
            client.reorder_tasks(&column_id, task_ids).await?;
            let ordered = client
                .read(|store| store.tasks(&column_id).to_vec())
                .await;
            print_json(&ordered)?
        }
        Command::Comment {
            column_id,
            task_id,
            text,
            author,
        } => {
            if let Some(author) = author {
                client.session().set_identity(author).await;
            }
            client
                .fetch_tasks_by_column(&ColumnId::new(column_id))
                .await?;
            print_json(&client.add_comment(&TaskId::new(task_id), &text).await?)?
        }
        Command::SignIn { token } => {
            if client.session().path().is_none() {
                bail!("no session_file configured; set it in the settings file or KANBAN_SESSION_FILE");
            }
            client.session().sign_in(token, None).await?;
            println!("signed in");
        }
        Command::SignOut => {
            client.session().invalidate().await;
            println!("signed out");
        }
    }

    Ok(())
}
