//! Per-stage orchestration: read inputs, run the stage, write the output.
//!
//! Each run is pure input-to-output; nothing persists between runs. A
//! failed stage leaves whatever it had already written (the caller is
//! expected to discard partial outputs), matching the upstream tools.

use std::io::Write;

use crate::assembler::{assemble, M1Config};
use crate::common::diag::{CompileError, Result};
use crate::frontend::lexer::lexer::lex_file;
use crate::frontend::lexer::token::TokenStream;
use crate::frontend::parser::compile;
use crate::frontend::preprocessor::preprocess;
use crate::linker::{link, Hex2Config as LinkerConfig};
use super::cli::{Hex2Config, M1CliConfig, M2Config};

fn read_source(path: &str) -> Result<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| CompileError::plain(format!("unable to open {}: {}", path, e)))?;
    String::from_utf8(bytes)
        .map_err(|_| CompileError::plain(format!("{} is not valid UTF-8 text", path)))
}

fn write_output(output: &Option<String>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, bytes)
            .map_err(|e| CompileError::plain(format!("unable to write {}: {}", path, e))),
        None => {
            let mut stdout = std::io::stdout();
            stdout
                .write_all(bytes)
                .and_then(|_| stdout.flush())
                .map_err(|e| CompileError::plain(format!("unable to write output: {}", e)))
        }
    }
}

/// M2: lex every input in order into one token stream, preprocess,
/// compile, and write the symbolic assembly listing.
pub fn run_m2(cfg: &M2Config) -> Result<()> {
    let mut stream = TokenStream::new();
    for path in &cfg.files {
        let content = read_source(path)?;
        lex_file(&mut stream, path, &content)?;
    }
    let stream = preprocess(stream)?;
    let lines = compile(stream, cfg.target, cfg.bootstrap, cfg.debug)?;
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    write_output(&cfg.output, text.as_bytes())
}

/// M1: assemble the concatenated inputs into the annotated digit stream.
pub fn run_m1(cfg: &M1CliConfig) -> Result<()> {
    let mut inputs = Vec::with_capacity(cfg.files.len());
    for path in &cfg.files {
        inputs.push((path.clone(), read_source(path)?));
    }
    let m1 = M1Config {
        target: cfg.target,
        base: cfg.base,
        little_endian: cfg.little_endian,
    };
    let text = assemble(&inputs, &m1)?;
    write_output(&cfg.output, text.as_bytes())
}

/// HEX2: link the concatenated inputs into the final image and mark it
/// executable unless told otherwise.
pub fn run_hex2(cfg: &Hex2Config) -> Result<()> {
    let mut inputs = Vec::with_capacity(cfg.files.len());
    for path in &cfg.files {
        inputs.push((path.clone(), read_source(path)?));
    }
    let linker = LinkerConfig {
        target: cfg.target,
        base: cfg.base,
        little_endian: cfg.little_endian,
        base_address: cfg.base_address,
    };
    let image = link(&inputs, &linker)?;
    write_output(&cfg.output, &image)?;
    if cfg.executable {
        if let Some(path) = &cfg.output {
            mark_executable(path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path)
        .map_err(|e| CompileError::plain(format!("unable to stat {}: {}", path, e)))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    std::fs::set_permissions(path, permissions)
        .map_err(|e| CompileError::plain(format!("unable to chmod {}: {}", path, e)))
}

#[cfg(not(unix))]
fn mark_executable(_path: &str) -> Result<()> {
    Ok(())
}
