use std::path::Path;

use super::types::Settings;

/// Load runner settings.
///
/// Priority: `~/.dbt-task/config.toml`, then `./dbt-task.toml`, then the
/// built-in defaults. Individual environment variables override whatever
/// was loaded.
pub fn load_default() -> anyhow::Result<Settings> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("cannot determine home directory"))?;
    let home_config = Path::new(&home).join(".dbt-task").join("config.toml");
    let local_config = Path::new("dbt-task.toml");

    let mut settings: Settings = if home_config.exists() {
        let s = std::fs::read_to_string(&home_config)?;
        toml::from_str::<Settings>(&s)?
    } else if local_config.exists() {
        let s = std::fs::read_to_string(local_config)?;
        toml::from_str::<Settings>(&s)?
    } else {
        Settings::default()
    };

    if let Ok(v) = std::env::var("DBT_TASK_TMP_ROOT") {
        if !v.trim().is_empty() {
            settings.tmp_root = v.into();
        }
    }
    if let Ok(v) = std::env::var("DBT_TASK_PROFILES_DIR") {
        if !v.trim().is_empty() {
            settings.profiles_dir = v.into();
        }
    }
    if let Ok(v) = std::env::var("DBT_TASK_LOCK_TIMEOUT_SECS") {
        if let Ok(secs) = v.trim().parse::<u64>() {
            settings.lock_timeout_secs = secs;
        }
    }
    if let Ok(v) = std::env::var("DBT_TASK_LOCK_STALE_AFTER_SECS") {
        if let Ok(secs) = v.trim().parse::<u64>() {
            settings.lock_stale_after_secs = secs;
        }
    }

    Ok(settings)
}
