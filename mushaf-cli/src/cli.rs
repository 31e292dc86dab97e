use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mushaf", about = "Mushaf pages and word-synchronized recitation", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Assemble a page and print its lines and ayahs
    Page {
        /// Page number, starting at 1
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        number: u32,
    },

    /// Assemble every page of the book
    Warm,

    /// Recite a page with a simulated player, printing highlights
    Play {
        /// Page number, starting at 1
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        number: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("mushaf").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_commands() {
        assert!(matches!(parse(&["page", "12"]).unwrap().command, Command::Page { number: 12 }));
        assert!(matches!(parse(&["play", "1"]).unwrap().command, Command::Play { number: 1 }));
        assert!(matches!(parse(&["warm"]).unwrap().command, Command::Warm));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["page"]).is_err());
        assert!(parse(&["page", "0"]).is_err());
        assert!(parse(&["play", "0"]).is_err());
        assert!(parse(&["page", "x"]).is_err());
        assert!(parse(&["delete"]).is_err());
    }
}
