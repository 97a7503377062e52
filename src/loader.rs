use std::path::{Path, PathBuf};

use crate::sim::inst::{Instruction, Opcode};

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("line {line}: unknown opcode {name:?}")]
    UnknownOpcode { line: usize, name: String },

    #[error("line {line}: invalid argument {text:?}")]
    BadArgument { line: usize, text: String },

    #[error("{path} contains no instructions")]
    Empty { path: PathBuf },
}

/// Line scanner for program text: one `OPCODE ARG1 ARG2` per line.
pub struct Scanner {
    line_num: usize,
}

impl Scanner {
    pub fn new() -> Scanner {
        Scanner { line_num: 0 }
    }

    pub fn scan(src: &str) -> Result<Vec<Instruction>, LoadError> {
        Scanner::new().scan_src(src)
    }

    pub fn scan_src(&mut self, src: &str) -> Result<Vec<Instruction>, LoadError> {
        let mut program = Vec::new();
        for line in src.lines() {
            self.line_num += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if let Some(inst) = self.scan_line(line)? {
                program.push(inst);
            }
        }
        Ok(program)
    }

    // Extra fields after the third are ignored; short lines are skipped.
    fn scan_line(&self, line: &str) -> Result<Option<Instruction>, LoadError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [name, arg1, arg2, ..] => {
                let opcode: Opcode = name.parse().map_err(|_| LoadError::UnknownOpcode {
                    line: self.line_num,
                    name: name.to_string(),
                })?;
                Ok(Some(Instruction::new(
                    opcode,
                    self.scan_number(arg1)?,
                    self.scan_number(arg2)?,
                )))
            }
            _ => Ok(None),
        }
    }

    fn scan_number(&self, text: &str) -> Result<i32, LoadError> {
        text.parse().map_err(|_| LoadError::BadArgument {
            line: self.line_num,
            text: text.to_string(),
        })
    }
}

impl Default for Scanner {
    fn default() -> Scanner {
        Scanner::new()
    }
}

pub fn load_program(path: &Path) -> Result<Vec<Instruction>, LoadError> {
    let src = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let program = Scanner::scan(&src)?;
    if program.is_empty() {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(program)
}
