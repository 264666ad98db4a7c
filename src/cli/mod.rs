use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(author, version, about = "Kubernetes cost-optimization control plane", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// One-shot analysis: refresh state once, compute recommendations and write a cost report
    Analyze {
        /// Cluster name for the report title (default: from kubeconfig or "default")
        #[arg(long = "cluster-name", value_name = "NAME")]
        cluster_name: Option<String>,

        /// Optimizer config file (YAML); defaults apply when unset
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,

        /// Kubernetes config file path
        #[arg(long = "kubeconfig", value_name = "FILE")]
        kubeconfig: Option<String>,

        /// Output file path for the report; if not set, defaults to {cluster-name}-cost-report-{YYYY-MM-DD-HHMMSS}.{ext}
        #[arg(short, long)]
        output: Option<String>,

        /// Output format: md (default) or json
        #[arg(short, long, default_value = "md")]
        format: ReportFormat,

        /// How many workloads to list in the top-workloads table
        #[arg(long = "top-workloads", value_name = "N", default_value_t = 10)]
        top_workloads: usize,
    },

    /// Run the control plane: refresh loop and controllers until interrupted
    Run {
        /// Optimizer config file (YAML); defaults apply when unset
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,

        /// Kubernetes config file path
        #[arg(long = "kubeconfig", value_name = "FILE")]
        kubeconfig: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum, Debug, Default)]
#[value(rename_all = "kebab-case")]
pub enum ReportFormat {
    #[default]
    Md,
    Json,
}
