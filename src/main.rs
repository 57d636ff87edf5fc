use clap::Parser;
use merakiclu::cli::{load_settings, Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            merakiclu::cli::output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    merakiclu::logging::init_tracing(&settings.log_level);

    let result = match cli.command {
        None | Some(Commands::Status) => merakiclu::cli::commands::status::execute(&settings),
        Some(Commands::Set {
            credential,
            ref value,
        }) => merakiclu::cli::commands::set::execute(&settings, credential, value.as_deref()),
        Some(Commands::Get { credential }) => {
            merakiclu::cli::commands::get::execute(&settings, credential)
        }
        Some(Commands::Clear { credential, force }) => {
            merakiclu::cli::commands::clear::execute(&settings, credential, force)
        }
        Some(Commands::ChangePassphrase) => {
            merakiclu::cli::commands::change_passphrase::execute(&settings)
        }
        Some(Commands::Audit { last, ref since }) => {
            merakiclu::cli::commands::audit_cmd::execute(&settings, last, since.as_deref())
        }
    };

    match result {
        Ok(()) => {}
        Err(merakiclu::errors::VaultError::UserCancelled) => {
            merakiclu::cli::output::info("Cancelled.");
        }
        Err(e) => {
            merakiclu::cli::output::error(&e.to_string());
            std::process::exit(1);
        }
    }
}
