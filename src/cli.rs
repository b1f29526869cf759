//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::data::LoanDataConfig;
use crate::viz::{PlotStyle, Point, QueryMode};

/// Cluster plots with counterfactual overlays, and loan-default data preparation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plot 2-D clusters, optionally with query or counterfactual points
    Plot(PlotArgs),
    /// Build the balanced loan-default train/test split
    Loan(LoanArgs),
}

#[derive(clap::Args, Debug)]
pub struct PlotArgs {
    /// CSV file with `x`, `y` and optionally `label` columns
    #[arg(short, long, default_value = "points.csv")]
    pub input: String,

    /// Output path for the plot (.png or .svg)
    #[arg(short, long, default_value = "cluster_plot.png")]
    pub output: String,

    /// Neighbours consulted by the k-NN classifier
    #[arg(short = 'k', long, default_value = "5")]
    pub neighbours: usize,

    /// Derive labels with K-Means using this many clusters
    #[arg(long)]
    pub kmeans: Option<usize>,

    /// Maximum iterations for K-Means
    #[arg(long, default_value = "300")]
    pub max_iters: usize,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Seed for K-Means initialisation
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Draw the raw points without fitting a classifier
    #[arg(long)]
    pub no_classifier: bool,

    /// Query point as "x,y"; give twice to compare two points
    /// Example: --query "1.5,-2.0"
    #[arg(short, long, allow_hyphen_values = true)]
    pub query: Vec<String>,

    /// Counterfactual for a single query point, as "x,y"
    #[arg(short, long, allow_hyphen_values = true)]
    pub counterfactual: Option<String>,

    /// Explanation text; suppresses the two-point overlay when present
    #[arg(long = "explanation")]
    pub explanations: Vec<String>,

    /// Plot width in pixels
    #[arg(long, default_value = "2000")]
    pub width: u32,

    /// Plot height in pixels
    #[arg(long, default_value = "1000")]
    pub height: u32,
}

impl PlotArgs {
    /// Turn the query flags into an explicit overlay mode
    pub fn query_mode(&self) -> crate::Result<QueryMode> {
        let queries = self
            .query
            .iter()
            .map(|q| parse_point(q))
            .collect::<crate::Result<Vec<_>>>()?;
        let counterfactual = self.counterfactual.as_deref().map(parse_point).transpose()?;

        match (queries.as_slice(), counterfactual) {
            ([], None) => Ok(QueryMode::None),
            ([query], None) => Ok(QueryMode::Single(*query)),
            ([query], Some(counterfactual)) => Ok(QueryMode::Counterfactual {
                query: *query,
                counterfactual,
            }),
            ([first, second], None) => Ok(QueryMode::Paired([*first, *second])),
            ([], Some(_)) => anyhow::bail!("--counterfactual needs a --query point"),
            (_, Some(_)) => anyhow::bail!("--counterfactual takes exactly one --query point"),
            (_, None) => anyhow::bail!("At most two --query points are supported"),
        }
    }

    pub fn explanations(&self) -> Option<&[String]> {
        if self.explanations.is_empty() {
            None
        } else {
            Some(&self.explanations)
        }
    }

    pub fn style(&self) -> PlotStyle {
        PlotStyle {
            width: self.width,
            height: self.height,
            ..PlotStyle::default()
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct LoanArgs {
    /// Applicant records CSV
    #[arg(long, default_value = "data/application_record.csv")]
    pub application: PathBuf,

    /// Credit status records CSV
    #[arg(long, default_value = "data/credit_record.csv")]
    pub credit: PathBuf,

    /// Joined rows kept before feature derivation
    #[arg(long, default_value = "10000")]
    pub row_limit: usize,

    /// Share of balanced rows used for training
    #[arg(long, default_value = "0.9")]
    pub train_fraction: f64,

    /// Seed for the train/test shuffle
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Neighbours for the held-out k-NN accuracy check
    #[arg(short = 'k', long, default_value = "5")]
    pub neighbours: usize,
}

impl LoanArgs {
    pub fn config(&self) -> LoanDataConfig {
        LoanDataConfig {
            application_path: self.application.clone(),
            credit_path: self.credit.clone(),
            row_limit: self.row_limit,
            train_fraction: self.train_fraction,
            seed: self.seed,
        }
    }
}

/// Parse a point given as "x,y"
pub fn parse_point(value: &str) -> crate::Result<Point> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 2 {
        anyhow::bail!("Points must be in format 'x,y' (got '{}')", value);
    }

    let x: f64 = parts[0]
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid x coordinate: {}", parts[0]))?;
    let y: f64 = parts[1]
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid y coordinate: {}", parts[1]))?;

    Ok((x, y))
}
