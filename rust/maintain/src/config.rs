use crate::job::JobConfig;
use crate::reaper::ServiceReaperConfig;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "./maintain_config.yaml";
pub const CONFIG_PATH_ENV_VAR: &str = "CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaintainConfig {
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
    #[serde(default)]
    pub service_reaper: ServiceReaperConfig,
}

impl MaintainConfig {
    /// Loads from `CONFIG_PATH` when set, else from the default path.
    pub fn load() -> Result<Self, figment::Error> {
        match std::env::var(CONFIG_PATH_ENV_VAR) {
            Ok(path) => Self::load_from_path(&path),
            Err(_) => Self::load_from_path(DEFAULT_CONFIG_PATH),
        }
    }

    pub fn load_from_path(path: &str) -> Result<Self, figment::Error> {
        // Nested keys are separated by "__" in the environment, figment expects ".".
        let mut f = figment::Figment::from(
            Env::prefixed("POLARIS_MAINTAIN_").map(|k| k.as_str().replace("__", ".").into()),
        );
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        f.extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const CONFIG: &str = r#"
jobs:
  - name: clean_deleted_instances
    enable: true
    option:
      batch_size: 50
      instance_clean_timeout: 5m
  - name: delete_empty_autocreated_service
    enable: false
service_reaper:
  open: true
  local_host: 10.0.0.1
  check_interval: 30s
  ignored_namespaces: [Polaris, ops]
"#;

    #[test]
    fn test_load_config_with_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("maintain_config.yaml", CONFIG)?;
            jail.set_env("POLARIS_MAINTAIN_SERVICE_REAPER__CHECK_COUNT_BEFORE_CLEAN", "5");

            let config = MaintainConfig::load_from_path("maintain_config.yaml")?;
            assert_eq!(config.jobs.len(), 2);
            assert_eq!(
                config.jobs[0],
                JobConfig::enabled("clean_deleted_instances")
                    .with_option("batch_size", 50)
                    .with_option("instance_clean_timeout", "5m")
            );
            assert!(!config.jobs[1].enable);

            let reaper = &config.service_reaper;
            assert!(reaper.open);
            assert_eq!(reaper.local_host, "10.0.0.1");
            assert_eq!(reaper.check_interval, Duration::from_secs(30));
            assert_eq!(reaper.check_count_before_clean, 5);
            assert_eq!(reaper.expire_time, Duration::from_secs(3600));
            assert_eq!(
                reaper.ignored_namespaces,
                vec!["Polaris".to_string(), "ops".to_string()]
            );
            Ok(())
        });
    }

    #[test]
    fn test_config_path_env_and_missing_file() {
        figment::Jail::expect_with(|jail| {
            let config = MaintainConfig::load_from_path("does_not_exist.yaml")?;
            assert!(config.jobs.is_empty());
            assert!(!config.service_reaper.open);

            jail.create_file("custom.yaml", CONFIG)?;
            jail.set_env(CONFIG_PATH_ENV_VAR, "custom.yaml");
            let config = MaintainConfig::load()?;
            assert_eq!(config.jobs.len(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_bad_duration_fails_to_load() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "maintain_config.yaml",
                "service_reaper:\n  check_interval: often\n",
            )?;
            assert!(MaintainConfig::load_from_path("maintain_config.yaml").is_err());
            Ok(())
        });
    }
}
