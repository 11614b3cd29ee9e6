//! CLI command implementations

pub mod authenticate;
pub mod check;
pub mod usage;

use sextant_core::config::LdapRealmSettings;
use sextant_core::SextantConfig;

use crate::OutputFormat;

/// Context passed to all commands
pub struct CommandContext {
    pub config: SextantConfig,
    pub output_format: OutputFormat,
    pub quiet: bool,
}

impl CommandContext {
    /// Check if output should be JSON
    pub fn is_json(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }

    /// Print info message if not quiet
    pub fn info(&self, msg: &str) {
        if !self.quiet && !self.is_json() {
            println!("{}", msg);
        }
    }

    /// Enabled realms in chain order
    pub fn realms(&self) -> Vec<&LdapRealmSettings> {
        self.config.ordered_realms()
    }
}
