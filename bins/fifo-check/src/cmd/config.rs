use std::path::Path;

use clap::Args;

use fifo_harness::ScenarioConfig;
use memory_broker::FaultPlan;

use super::error::CheckError;

/// Сколько сообщений на producer'а во встроенном сценарии.
const DEFAULT_COUNT: u64 = 10;

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    /// Путь к TOML сценарию. Если файла нет, используется fifo-testcase-1
    #[arg(long, default_value = "fifo-check.toml", env = "FIFO_CHECK_CONFIG")]
    pub config: String,

    /// Адрес брокера (встроен только memory://)
    #[arg(long, default_value = "memory://", env = "FIFO_CHECK_ENDPOINT")]
    pub endpoint: String,

    #[arg(long, env = "FIFO_CHECK_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "FIFO_CHECK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Имя очереди
    #[arg(long)]
    pub queue: Option<String>,

    /// Сообщений на каждого producer'а
    #[arg(long)]
    pub count: Option<u64>,

    #[arg(long)]
    pub scenario_id: Option<String>,

    /// Prefetch consumer'а
    #[arg(long)]
    pub prefetch: Option<u32>,

    /// Печатать отчёт как JSON
    #[arg(long)]
    pub json: bool,
}

// ═══════════════════════════════════════════════════════════════
//  Endpoint
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// In-process брокер из `memory-broker`.
    Memory,
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self, CheckError> {
        match s.split_once("://") {
            Some(("memory", _)) => Ok(Endpoint::Memory),
            _ => Err(CheckError::Endpoint(s.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Итоговая конфигурация после мержа: сценарий из файла < env/CLI
pub struct Effective {
    pub endpoint: Endpoint,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scenario: ScenarioConfig,
    pub faults: FaultPlan,
    pub json: bool,
}

impl Effective {
    pub fn new(args: &CheckArgs) -> Result<Self, CheckError> {
        let endpoint = Endpoint::parse(&args.endpoint)?;

        let mut scenario = if Path::new(&args.config).exists() {
            let cfg = ScenarioConfig::load(&args.config)?;
            tracing::info!(config = %args.config, "loaded scenario");
            cfg
        } else {
            tracing::info!(config = %args.config, "no scenario file, using built-in fifo-testcase-1");
            ScenarioConfig::testcase_one(
                args.count.unwrap_or(DEFAULT_COUNT),
                args.prefetch.unwrap_or(1),
            )
        };

        if let Some(id) = &args.scenario_id {
            scenario.scenario_id = id.clone();
        }
        if let Some(queue) = &args.queue {
            scenario.queue = queue.clone();
        }
        if let Some(prefetch) = args.prefetch {
            scenario.consumer.prefetch = prefetch;
        }
        if let Some(count) = args.count {
            for p in &mut scenario.producers {
                p.count = count;
            }
        }
        scenario.validate()?;

        let faults = match &scenario.broker {
            Some(v) => {
                let json = serde_json::to_string(v).map_err(|e| CheckError::Broker(format!("serialize: {e}")))?;
                serde_json::from_str(&json).map_err(|e| CheckError::Broker(format!("parse: {e}")))?
            }
            None => FaultPlan::default(),
        };

        Ok(Self {
            endpoint,
            username: args.username.clone(),
            password: args.password.clone(),
            scenario,
            faults,
            json: args.json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config: &str) -> CheckArgs {
        CheckArgs {
            config: config.into(),
            endpoint: "memory://".into(),
            username: None,
            password: None,
            queue: None,
            count: None,
            scenario_id: None,
            prefetch: None,
            json: false,
        }
    }

    #[test]
    fn missing_file_falls_back_to_preset() {
        let mut a = args("/nonexistent/fifo-check.toml");
        a.count = Some(25);
        a.prefetch = Some(5);
        a.queue = Some("orders".into());

        let eff = Effective::new(&a).unwrap();
        assert_eq!(eff.endpoint, Endpoint::Memory);
        assert_eq!(eff.scenario.scenario_id, "fifo-testcase-1");
        assert_eq!(eff.scenario.queue, "orders");
        assert_eq!(eff.scenario.consumer.prefetch, 5);
        assert_eq!(eff.scenario.consumer.expected, Some(100));
        assert!(eff.scenario.producers.iter().all(|p| p.count == 25));
        assert!(eff.faults.is_empty());
    }

    #[test]
    fn file_values_are_overridden_by_flags() {
        let path = std::env::temp_dir().join(format!("fifo-check-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
scenario_id = "from-file"
queue = "file.queue"

[consumer]
prefetch = 2

[[producers]]
name = "p1"
group = "G"
count = 3
sequence_start = 0
prefix = "g-"

[broker]
swap_every = 2
reject_sends = { "g-1" = 1 }
"#,
        )
        .unwrap();

        let mut a = args(path.to_str().unwrap());
        a.scenario_id = Some("from-cli".into());
        let eff = Effective::new(&a).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(eff.scenario.scenario_id, "from-cli");
        assert_eq!(eff.scenario.queue, "file.queue");
        assert_eq!(eff.scenario.consumer.prefetch, 2);
        assert_eq!(eff.faults.swap_every, Some(2));
        assert_eq!(eff.faults.reject_sends["g-1"], 1);
    }

    #[test]
    fn only_memory_endpoint_is_supported() {
        assert_eq!(Endpoint::parse("memory://local").unwrap(), Endpoint::Memory);
        assert!(matches!(
            Endpoint::parse("ssl://b-1234.mq.amazonaws.com:61617"),
            Err(CheckError::Endpoint(_))
        ));
        assert!(Endpoint::parse("memory").is_err());
    }

    #[test]
    fn zero_prefetch_flag_is_rejected() {
        let mut a = args("/nonexistent/fifo-check.toml");
        a.prefetch = Some(0);
        assert!(matches!(Effective::new(&a), Err(CheckError::Config(_))));
    }
}
