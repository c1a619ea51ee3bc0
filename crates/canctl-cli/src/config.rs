//! Configuration file loading.
//!
//! `key=value` lines, one per line, matching the format the original server
//! reads: `PORT=<u16>` (required), `LOG_LEVEL=<DEBUG|INFO|WARNING|ERROR|NOLOG>`
//! (default `ERROR`), `WORKER_THREADS=<positive int>` (default 1).

use anyhow::{bail, Context, Result};

use canctl_net::LogLevel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub log_level: LogLevel,
    pub worker_threads: usize,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self> {
        let mut port = None;
        let mut log_level = LogLevel::Error;
        let mut worker_threads = 1usize;

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("malformed config line {}: {raw_line:?}", lineno + 1);
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "PORT" => {
                    port = Some(
                        value
                            .parse::<u16>()
                            .with_context(|| format!("invalid PORT value {value:?}"))?,
                    );
                }
                "LOG_LEVEL" => {
                    log_level = match value.parse::<LogLevel>() {
                        Ok(level) => level,
                        Err(_) => {
                            tracing::warn!(value, "unknown log level, using ERROR");
                            LogLevel::Error
                        }
                    };
                }
                "WORKER_THREADS" => {
                    worker_threads = match value.parse::<usize>() {
                        Ok(0) => 1,
                        Ok(parsed) => parsed,
                        Err(_) => {
                            tracing::warn!(value, "invalid WORKER_THREADS value, using 1");
                            1
                        }
                    };
                }
                other => {
                    tracing::warn!(key = other, "ignoring unrecognized config key");
                }
            }
        }

        let port = port.context("PORT is required in the config file")?;

        Ok(Config {
            port,
            log_level,
            worker_threads,
        })
    }
}
