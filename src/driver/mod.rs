pub mod cli;
#[allow(clippy::module_inception)]
pub mod driver;
#[cfg(test)]
mod tests;

pub use self::cli::{CliAction, Hex2Config, M1CliConfig, M2Config};

/// Which of the three stage binaries is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    M2,
    M1,
    Hex2,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::M2 => "M2",
            Stage::M1 => "M1",
            Stage::Hex2 => "hex2",
        }
    }
}

/// Parse arguments and run one stage, returning the process exit code:
/// 0 on success, 1 for fatal compilation errors, 2 for bad arguments.
pub fn run_stage(stage: Stage, args: &[String]) -> i32 {
    let result = match stage {
        Stage::M2 => match cli::parse_m2(args) {
            Ok(CliAction::Exit) => return 0,
            Ok(CliAction::Run(cfg)) => driver::run_m2(&cfg),
            Err(e) => {
                eprintln!("{}: {}", stage.name(), e);
                return 2;
            }
        },
        Stage::M1 => match cli::parse_m1(args) {
            Ok(CliAction::Exit) => return 0,
            Ok(CliAction::Run(cfg)) => driver::run_m1(&cfg),
            Err(e) => {
                eprintln!("{}: {}", stage.name(), e);
                return 2;
            }
        },
        Stage::Hex2 => match cli::parse_hex2(args) {
            Ok(CliAction::Exit) => return 0,
            Ok(CliAction::Run(cfg)) => driver::run_hex2(&cfg),
            Err(e) => {
                eprintln!("{}: {}", stage.name(), e);
                return 2;
            }
        },
    };
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}
