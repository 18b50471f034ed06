//! boxsync-status: show what the client syncing a directory is doing

use boxsync::cli::StatusArgs;
use boxsync::orchestrator::SyncStatus;
use boxsync::state::MetadataDir;
use clap::Parser;
use std::io;

fn main() {
    let args = StatusArgs::parse();
    let path = MetadataDir::new(&args.root).status_path();

    let status = match SyncStatus::read(&path) {
        Ok(status) => status,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            eprintln!("No client running for {}", args.root.display());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cannot read {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Cannot encode status: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    println!("pid {}  started {}", status.pid, status.started_at);
    println!(
        "cursor {}  tracked {}  completed {}  failed {}  preempted {}  vetoed {}",
        status.last_action_id,
        status.tracked_files,
        status.completed,
        status.failed,
        status.preempted,
        status.vetoed
    );
    if status.pending.is_empty() {
        println!("idle");
        return;
    }
    println!("{:<14} {:>8} {:>10}  PATH", "KIND", "TASK", "RUNNING");
    for task in &status.pending {
        println!(
            "{:<14} {:>8} {:>8}ms  {}",
            task.kind, task.task_id, task.running_ms, task.path
        );
    }
}
