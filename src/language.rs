use crate::isolate::CommandTuple;
use serde::{Deserialize, Serialize};

/// Languages accepted for submissions and task scripts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "python3")]
    Python3,
    #[serde(rename = "cpp")]
    Cpp,
    #[serde(rename = "java")]
    Java,
    #[serde(rename = "text")]
    PlainText,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LanguageSpec {
    pub interpreter: Option<&'static str>,
    /// Added on top of the memory limit, runtimes like the JVM reserve a lot up front
    pub runtime_bonus_memory_byte: u64,
    pub runtime_process_limit: Option<u32>,
}

const MIB: u64 = 1_024 * 1_024;

impl Language {
    pub fn spec(self) -> LanguageSpec {
        match self {
            Language::Cpp => LanguageSpec {
                interpreter: None,
                runtime_bonus_memory_byte: 0,
                runtime_process_limit: None,
            },
            Language::Python3 => LanguageSpec {
                interpreter: Some("/usr/bin/python3"),
                runtime_bonus_memory_byte: 16 * MIB,
                runtime_process_limit: None,
            },
            Language::Java => LanguageSpec {
                interpreter: Some("/usr/bin/java"),
                runtime_bonus_memory_byte: 256 * MIB,
                // java spawns GC and JIT threads
                runtime_process_limit: Some(64),
            },
            Language::PlainText => LanguageSpec {
                interpreter: None,
                runtime_bonus_memory_byte: 0,
                runtime_process_limit: None,
            },
        }
    }

    pub fn is_runnable(self) -> bool {
        self != Language::PlainText
    }

    pub fn process_limit(self) -> u32 {
        self.spec().runtime_process_limit.unwrap_or(1)
    }

    /// Command that launches a compiled artifact found at `exe_path` inside a box.
    ///
    /// Returns `None` for languages that cannot be executed at all.
    pub fn launch_command(self, exe_path: &str, memory_limit_byte: u64) -> Option<CommandTuple> {
        if !self.is_runnable() {
            return None;
        }
        let args = match self {
            Language::Python3 => vec![
                // Don't write .pyc files next to the script
                "-B".into(),
                exe_path.into(),
            ],
            Language::Java => vec![
                format!("-Xmx{}k", memory_limit_byte / 1_024),
                "-Xss64m".into(),
                "-DONLINE_JUDGE=true".into(),
                "-Duser.language=en".into(),
                "-Duser.region=US".into(),
                "-Duser.variant=US".into(),
                "-jar".into(),
                exe_path.into(),
            ],
            Language::Cpp | Language::PlainText => vec![],
        };
        Some(match self.spec().interpreter {
            Some(interpreter) => CommandTuple {
                binary_path: interpreter.into(),
                args,
            },
            None => CommandTuple {
                binary_path: exe_path.into(),
                args,
            },
        })
    }
}
