use std::env;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use election::ElectionConfig;

#[derive(Parser, Debug)]
#[command(name = "leaderelection", version, about, long_about = None)]
pub struct Cli {
    /// Path to kubeconfig, used when not running inside a cluster
    #[arg(long, env = "KUBECONFIG", default_value_os_t = default_kubeconfig())]
    pub kubeconfig: PathBuf,

    /// Namespace holding the lock ConfigMap
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Name of the lock ConfigMap
    #[arg(long, default_value = "my-configmap")]
    pub configmap: String,

    /// Leader identity
    #[arg(long, default_value_t = uuid::Uuid::new_v4().to_string())]
    pub id: String,

    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, action = ArgAction::Count)]
    pub verbosity: u8,
}

impl Cli {
    pub fn election_config(&self) -> ElectionConfig {
        ElectionConfig::new(&self.configmap)
            .with_namespace(&self.namespace)
            .with_identity(&self.id)
    }

    /// Log filter used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn default_kubeconfig() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".kube")
        .join("config")
}
