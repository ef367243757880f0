//! Command line capture.
//!
//! Options are interpreted by the server, not by clap: the whole vector after
//! the program name is collected verbatim, including `-h` and `-v`.

use clap::Parser as ClapParser;

/// `corten-node [options] [script.js] [arguments]`
#[derive(ClapParser, Debug)]
#[command(name = "corten-node", disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    /// Runtime options, the script and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
