//! clusterlens: cluster plots with counterfactual overlays, and loan-default
//! data preparation
//!
//! This is the main entrypoint that dispatches to the plotting and loan
//! subcommands.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use clusterlens::cli::{Command, LoanArgs, PlotArgs};
use clusterlens::model::{accuracy, fit_kmeans, unique_labels, Classifier, KnnClassifier};
use clusterlens::viz::{plot_clusters, QueryMode};
use clusterlens::{load_loan_data, load_points, Args};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match &args.command {
        Command::Plot(plot) => run_plot(plot, args.verbose),
        Command::Loan(loan) => run_loan(loan, args.verbose),
    }
}

/// Render a cluster plot for a point CSV
fn run_plot(args: &PlotArgs, verbose: bool) -> Result<()> {
    println!("=== Cluster Plot ===\n");

    let start_time = Instant::now();
    let query = args.query_mode()?;

    if verbose {
        println!("Loading points from: {}", args.input);
    }
    let point_set = load_points(Path::new(&args.input))?;
    let n_points = point_set.points.nrows();
    println!("✓ Points loaded: {}", n_points);

    let labels = match (args.kmeans, point_set.labels) {
        (Some(n_clusters), _) => {
            if verbose {
                println!("Deriving labels with K-Means ({} clusters)", n_clusters);
            }
            let model = fit_kmeans(
                &point_set.points,
                n_clusters,
                args.max_iters,
                args.tolerance,
                args.seed,
            )?;
            if verbose {
                println!("  Inertia: {:.2}", model.inertia);
                for (cluster, size) in model.cluster_sizes().iter().enumerate() {
                    println!("  Cluster {}: {} points", cluster, size);
                }
            }
            model.labels
        }
        (None, Some(labels)) => labels,
        (None, None) => anyhow::bail!(
            "{} has no label column; pass --kmeans N to derive labels",
            args.input
        ),
    };

    let classifier = if args.no_classifier {
        None
    } else {
        let k = args.neighbours.min(n_points);
        if verbose {
            println!("Fitting k-NN classifier with {} neighbours", k);
        }
        Some(KnnClassifier::fit(&point_set.points, &labels, k)?)
    };

    let figure = plot_clusters(
        &point_set.points,
        &labels,
        classifier.as_ref().map(|c| c as &dyn Classifier),
        &query,
        args.explanations(),
        &args.style(),
        &args.output,
    )?;

    println!("✓ Clusters annotated: {}", figure.annotations.len());
    if let Some(classifier) = &classifier {
        print_query_predictions(classifier, &query)?;
    }

    println!("\nPlot saved to: {}", args.output);
    if verbose {
        println!("Total time: {:.2}s", start_time.elapsed().as_secs_f64());
    }

    Ok(())
}

fn print_query_predictions(classifier: &KnnClassifier, query: &QueryMode) -> Result<()> {
    let points = match query {
        QueryMode::None => return Ok(()),
        QueryMode::Single(p) => vec![("P", *p)],
        QueryMode::Counterfactual {
            query,
            counterfactual,
        } => vec![("P", *query), ("P_cf", *counterfactual)],
        QueryMode::Paired([first, second]) => vec![("P_0", *first), ("P_1", *second)],
    };

    for (name, (x, y)) in points {
        let predicted = classifier.predict(&ndarray::array![[x, y]])?;
        let cluster = predicted
            .get(0)
            .copied()
            .context("classifier returned no prediction")?;
        println!("  {} = ({}, {}) → Cluster {}", name, x, y, cluster);
    }
    Ok(())
}

/// Prepare the loan split and report a held-out k-NN accuracy
fn run_loan(args: &LoanArgs, verbose: bool) -> Result<()> {
    println!("=== Loan Dataset ===\n");

    let start_time = Instant::now();
    let config = args.config();

    if verbose {
        println!("Application records: {}", config.application_path.display());
        println!("Credit records: {}", config.credit_path.display());
        println!("Row limit: {}", config.row_limit);
        println!("Seed: {}", config.seed);
    }

    let split = load_loan_data(&config)?;
    let total = split.x_train.nrows() + split.x_test.nrows();
    let defaults = split
        .y_train
        .iter()
        .chain(split.y_test.iter())
        .filter(|&&y| y == 1)
        .count();

    println!("✓ Balanced rows: {} ({} defaults)", total, defaults);
    println!("  Train: {} rows", split.x_train.nrows());
    println!("  Test:  {} rows", split.x_test.nrows());
    if verbose {
        println!("  Features: {}", split.feature_names.join(", "));
        println!("  Classes: {:?}", unique_labels(&split.y_train));
    }

    if split.x_train.nrows() == 0 || split.x_test.nrows() == 0 {
        println!("\nNot enough rows for an accuracy check");
        return Ok(());
    }

    let k = args.neighbours.min(split.x_train.nrows());
    let knn = KnnClassifier::fit(&split.x_train, &split.y_train, k)?;
    let predicted = knn.predict(&split.x_test)?;
    println!(
        "\nk-NN (k = {}) test accuracy: {:.1}%",
        k,
        accuracy(&predicted, &split.y_test) * 100.0
    );

    if verbose {
        println!("Total time: {:.2}s", start_time.elapsed().as_secs_f64());
    }

    Ok(())
}
