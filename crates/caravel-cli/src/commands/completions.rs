use super::EXIT_SUCCESS;
use clap::CommandFactory;
use clap_complete::Shell;

pub fn run(shell: Shell) -> Result<u8, String> {
    let mut command = crate::Cli::command();
    let name = command.get_name().to_owned();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
    Ok(EXIT_SUCCESS)
}
