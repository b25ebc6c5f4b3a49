mod conditionals;
mod expr_eval;
mod macro_defs;
mod preprocessor;

pub use self::macro_defs::{MacroDef, MacroTable};
pub use self::preprocessor::{preprocess, Preprocessor};
