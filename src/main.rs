// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};
use sample_mapper::analysis::{AnalysisEvent, CancelToken};
use sample_mapper::assign::AssignTarget;
use sample_mapper::config::Settings;
use sample_mapper::midi;
use sample_mapper::workspace::Workspace;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Maps instrument recordings onto notes and velocity layers."
)]
struct Cli {
    /// The path to the settings file. Defaults to sample-mapper.yaml if it exists.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the stored sessions.
    Sessions {},
    /// Creates a new session.
    Create {
        /// The name of the session.
        name: String,
    },
    /// Deletes a session and its backup.
    Delete {
        /// The name of the session.
        name: String,
    },
    /// Scans a folder into a session and analyzes every new file.
    Analyze {
        /// The name of the session. It is created if it does not exist.
        name: String,
        /// The folder holding the recordings.
        folder: PathBuf,
    },
    /// Assigns analyzed samples to velocity layers.
    Assign {
        /// The name of the session.
        name: String,
        /// Only assign this MIDI note.
        #[arg(short, long)]
        note: Option<u8>,
    },
    /// Prints the coverage of the session's mapping.
    Coverage {
        /// The name of the session.
        name: String,
    },
    /// Copies the mapped samples to the output folder.
    Export {
        /// The name of the session.
        name: String,
        /// The output folder. Defaults to the session's last output folder.
        output: Option<PathBuf>,
    },
    /// Prints the effective settings.
    Config {},
}

fn print_event(event: &AnalysisEvent) {
    match event {
        AnalysisEvent::Started { total } => println!("Analyzing {} files", total),
        AnalysisEvent::Progress {
            current,
            total,
            path,
        } => println!("[{}/{}] {}", current, total, path.display()),
        AnalysisEvent::Failed { path, reason } => {
            println!("  failed: {}: {}", path.display(), reason)
        }
        AnalysisEvent::Finished { .. } => {}
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    if let Commands::Config {} = cli.command {
        print!("{}", settings.to_yaml()?);
        return Ok(());
    }

    let mut workspace = Workspace::new(settings)?;
    match cli.command {
        Commands::Sessions {} => {
            let sessions = workspace.list_sessions()?;
            if sessions.is_empty() {
                println!("No sessions found.");
                return Ok(());
            }

            println!("Sessions (count: {}):", sessions.len());
            for session in sessions {
                println!("- {}", session);
            }
        }
        Commands::Create { name } => {
            workspace.create_session(&name)?;
            println!("Created session {}.", name);
        }
        Commands::Delete { name } => {
            if workspace.delete_session(&name)? {
                println!("Deleted session {}.", name);
            } else {
                println!("No session named {}.", name);
            }
        }
        Commands::Analyze { name, folder } => {
            if workspace.store().exists(&name) {
                workspace.load_session(&name)?;
            } else {
                workspace.create_session(&name)?;
            }
            let scan = workspace.scan_folder(&folder)?;
            println!(
                "Found {} files: {} cached, {} to analyze, {} mappings restored.",
                scan.discovered, scan.cached, scan.pending, scan.restored
            );

            let summary = workspace.analyze(print_event, &CancelToken::new())?;
            println!(
                "Analyzed {} files, {} failed.",
                summary.analyzed,
                summary.failed.len()
            );
            let unanalyzed = workspace
                .samples()
                .iter()
                .filter(|sample| !sample.analyzed())
                .count();
            if unanalyzed > 0 {
                println!("{} samples have no usable pitch or loudness.", unanalyzed);
            }
            workspace.close_session()?;
        }
        Commands::Assign { name, note } => {
            workspace.load_session(&name)?;
            let target = match note {
                Some(note) if !midi::is_piano_note(note) => {
                    return Err(format!("note {} is outside the piano range", note).into())
                }
                Some(note) => AssignTarget::Note(note),
                None => AssignTarget::All,
            };
            let summary = workspace.auto_assign(target)?;
            println!(
                "Assigned {} samples across {} notes.",
                summary.samples_assigned, summary.notes_touched
            );
            workspace.close_session()?;
        }
        Commands::Coverage { name } => {
            workspace.load_session(&name)?;
            print!("{}", workspace.coverage_report()?);
            workspace.close_session()?;
        }
        Commands::Export { name, output } => {
            workspace.load_session(&name)?;
            let summary = workspace.export(output.as_deref())?;
            println!("Exported {} samples.", summary.exported);
            for (file, reason) in &summary.failed {
                println!("- skipped {}: {}", file, reason);
            }
            workspace.close_session()?;
        }
        Commands::Config {} => {}
    }

    Ok(())
}
