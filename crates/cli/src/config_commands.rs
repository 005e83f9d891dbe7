use std::path::Path;

use {anyhow::Result, clap::Subcommand};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration with secrets redacted.
    Show,
    /// Print the path of the config file in use.
    Path,
}

pub fn handle_config(action: ConfigAction, config_dir: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = skillbox_config::discover_and_load(config_dir);
            print!("{}", skillbox_config::redacted_toml(&config)?);
        },
        ConfigAction::Path => match skillbox_config::find_config_file(config_dir) {
            Some(path) => println!("{}", path.display()),
            None => {
                let dir = config_dir
                    .map(Path::to_path_buf)
                    .or_else(skillbox_config::config_dir);
                match dir {
                    Some(dir) => eprintln!(
                        "No config file found; create {}",
                        dir.join("skillbox.toml").display()
                    ),
                    None => eprintln!("No config file found."),
                }
            },
        },
    }
    Ok(())
}
