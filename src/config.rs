use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "data/plugin_data/join_logs";

#[derive(Debug, Clone)]
pub struct Config {
    pub number: i64,
    pub password: String,
    pub level: String,
    /// Kept outside the binary's own dir so upgrades don't wipe it.
    pub data_dir: PathBuf,
    pub enable_audit: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            number: dotenv::var("number")?.parse()?,
            password: dotenv::var("password")?,
            level: dotenv::var("level").unwrap_or_else(|_| "info".to_owned()),
            data_dir: dotenv::var("join_logs_dir")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            enable_audit: parse_flag(dotenv::var("join_logs_audit").ok().as_deref())?,
        })
    }
}

fn parse_flag(value: Option<&str>) -> anyhow::Result<bool> {
    match value.map(str::trim) {
        None | Some("") => Ok(false),
        Some("1") | Some("true") | Some("on") => Ok(true),
        Some("0") | Some("false") | Some("off") => Ok(false),
        Some(other) => Err(anyhow::anyhow!("join_logs_audit: not a flag: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        assert!(!parse_flag(None).unwrap());
        assert!(parse_flag(Some(" true")).unwrap());
        assert!(!parse_flag(Some("off")).unwrap());
        assert!(parse_flag(Some("maybe")).is_err());
    }
}
