//! Main entry point for the polyfs CLI app

use polyfs::cli::{self, ArchiveCommands, Commands};

fn main() -> std::process::ExitCode {
    init_tracing();
    if let Err(e) = run_app() {
        if let Some(parse) = e.downcast_ref::<clap::Error>() {
            use clap::error::ErrorKind;
            if matches!(parse.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                return std::process::ExitCode::SUCCESS;
            }
        } else {
            eprintln!("Error: {}", e);
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    let vfs = cli::build_vfs(args.root, &args.su_command);

    match &args.command {
        Commands::Stat { path, follow, json } => {
            cli::cmd_stat(&vfs, path, *follow, *json)?;
        }
        Commands::List { path } => {
            cli::cmd_list(&vfs, path)?;
        }
        Commands::Cat { path } => {
            cli::cmd_cat(&vfs, path)?;
        }
        Commands::Mkdir { path } => {
            vfs.create_directory(&cli::parse_path(path)?)?;
        }
        Commands::Rm { path } => {
            vfs.delete(&cli::parse_path(path)?)?;
        }
        Commands::Cp { from, to } => {
            vfs.copy(&cli::parse_path(from)?, &cli::parse_path(to)?)?;
        }
        Commands::Mv { from, to } => {
            vfs.rename(&cli::parse_path(from)?, &cli::parse_path(to)?)?;
        }
        Commands::Archive(ArchiveCommands::Create { inputs, output, format, compress }) => {
            cli::cmd_archive_create(
                &vfs,
                inputs,
                output,
                (*format).into(),
                compress.map(Into::into),
            )?;
        }
        Commands::Archive(ArchiveCommands::List { archive, json }) => {
            cli::cmd_archive_list(archive, *json)?;
        }
    }

    Ok(())
}
