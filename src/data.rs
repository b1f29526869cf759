//! Data loading with Polars: loan-default training data and 2-D point sets

use std::path::{Path, PathBuf};

use anyhow::Context;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Column holding the default flag in the prepared loan table
pub const LABEL_COLUMN: &str = "Default?";

/// Feature columns of the prepared loan table, in output order
pub const FEATURE_COLUMNS: [&str; 11] = [
    "# Children",
    "Total Income",
    "# Family Members",
    "Male?",
    "Own Car?",
    "Own Realty?",
    "Partnered?",
    "Working?",
    "Live with Parents?",
    "Days Old",
    "Days Employed",
];

const NOT_PARTNERED: [&str; 3] = ["Single / not married", "Widowed", "Separated"];
const NOT_WORKING: [&str; 2] = ["Pensioner", "Student"];
/// Credit status codes meaning the month was paid off or had no loan
const NO_DEFAULT_STATUS: [&str; 2] = ["C", "X"];

/// Where the loan tables live and how to cut them
#[derive(Debug, Clone)]
pub struct LoanDataConfig {
    /// Applicant records keyed by `ID`
    pub application_path: PathBuf,
    /// Monthly credit status records keyed by `ID`
    pub credit_path: PathBuf,
    /// Number of joined rows kept before feature derivation
    pub row_limit: usize,
    /// Share of balanced rows used for training
    pub train_fraction: f64,
    /// Seed for the train/test shuffle
    pub seed: u64,
}

impl Default for LoanDataConfig {
    fn default() -> Self {
        Self {
            application_path: PathBuf::from("data/application_record.csv"),
            credit_path: PathBuf::from("data/credit_record.csv"),
            row_limit: 10_000,
            train_fraction: 0.90,
            seed: 0,
        }
    }
}

/// Joined and feature-engineered loan rows, before class balancing
#[derive(Debug)]
pub struct LoanTable {
    pub feature_names: Vec<String>,
    /// One row per joined credit month, columns as in `feature_names`
    pub features: Array2<f64>,
    /// 1 when the month is a default, else 0
    pub labels: Array1<usize>,
}

/// Train/test partition of the balanced loan table
#[derive(Debug)]
pub struct LoanSplit {
    pub feature_names: Vec<String>,
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<usize>,
    pub y_test: Array1<usize>,
}

impl LoanSplit {
    /// Unpack as (train features, test features, train labels, test labels)
    pub fn into_parts(self) -> (Array2<f64>, Array2<f64>, Array1<usize>, Array1<usize>) {
        (self.x_train, self.x_test, self.y_train, self.y_test)
    }
}

/// Load, balance and split the loan-default data.
///
/// # Arguments
/// * `config` - Input paths, row limit, split fraction and seed
///
/// # Returns
/// * `LoanSplit` whose halves together hold every balanced row exactly once
pub fn load_loan_data(config: &LoanDataConfig) -> crate::Result<LoanSplit> {
    let table = load_loan_table(config)?;

    let keep = balance_classes(&table.labels);
    let features = table.features.select(Axis(0), &keep);
    let labels = table.labels.select(Axis(0), &keep);
    log::info!(
        "Balanced loan table: {} of {} rows kept",
        keep.len(),
        table.labels.len()
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let (x_train, x_test, y_train, y_test) =
        train_test_split(&features, &labels, config.train_fraction, &mut rng)?;

    Ok(LoanSplit {
        feature_names: table.feature_names,
        x_train,
        x_test,
        y_train,
        y_test,
    })
}

/// Join the two loan tables and derive the model features.
///
/// Rows whose `DAYS_EMPLOYED` is not negative are dropped: that column uses a
/// positive placeholder for applicants who are not currently employed.
pub fn load_loan_table(config: &LoanDataConfig) -> crate::Result<LoanTable> {
    let application = read_table(&config.application_path)?.with_row_index("application_row", None);
    let credit = read_table(&config.credit_path)?.with_row_index("credit_row", None);

    let df = application
        .inner_join(credit, col("ID"), col("ID"))
        .sort_by_exprs(
            [col("application_row"), col("credit_row")],
            SortMultipleOptions::default(),
        )
        .limit(config.row_limit.min(IdxSize::MAX as usize) as IdxSize)
        .with_columns([
            indicator(col("CODE_GENDER").eq(lit("M")), 1, 0).alias("Male?"),
            indicator(col("FLAG_OWN_CAR").eq(lit("Y")), 1, 0).alias("Own Car?"),
            indicator(col("FLAG_OWN_REALTY").eq(lit("Y")), 1, 0).alias("Own Realty?"),
            indicator(any_of("NAME_FAMILY_STATUS", &NOT_PARTNERED), 0, 1).alias("Partnered?"),
            indicator(any_of("NAME_INCOME_TYPE", &NOT_WORKING), 0, 1).alias("Working?"),
            indicator(col("NAME_HOUSING_TYPE").eq(lit("With parents")), 1, 0)
                .alias("Live with Parents?"),
            (lit(0i64) - integer("DAYS_BIRTH")).alias("Days Old"),
        ])
        .filter(integer("DAYS_EMPLOYED").lt(lit(0i64)))
        .with_columns([
            (lit(0i64) - integer("DAYS_EMPLOYED")).alias("Days Employed"),
            indicator(any_of("STATUS", &NO_DEFAULT_STATUS), 0, 1).alias(LABEL_COLUMN),
        ])
        .select([
            col("CNT_CHILDREN").alias("# Children"),
            col("AMT_INCOME_TOTAL").alias("Total Income"),
            col("CNT_FAM_MEMBERS").alias("# Family Members"),
            col("Male?"),
            col("Own Car?"),
            col("Own Realty?"),
            col("Partnered?"),
            col("Working?"),
            col("Live with Parents?"),
            col("Days Old"),
            col("Days Employed"),
            col(LABEL_COLUMN),
        ])
        .collect()?;

    log::info!("Prepared loan table with {} rows", df.height());

    let columns = FEATURE_COLUMNS
        .iter()
        .map(|name| column_f64(&df, name))
        .collect::<crate::Result<Vec<_>>>()?;
    let features = Array2::from_shape_fn((df.height(), columns.len()), |(i, j)| columns[j][i]);

    let labels = column_i64(&df, LABEL_COLUMN)?
        .into_iter()
        .map(|v| v as usize)
        .collect::<Array1<usize>>();

    Ok(LoanTable {
        feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        features,
        labels,
    })
}

/// Row indices for a balanced subset: every positive row, then as many
/// negative rows as there are positives, both in original order.
///
/// When negatives are the minority all of them are kept and the result is
/// left imbalanced.
pub fn balance_classes(labels: &Array1<usize>) -> Vec<usize> {
    let positives: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &label)| label == 1)
        .map(|(i, _)| i)
        .collect();
    let negatives: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &label)| label == 0)
        .map(|(i, _)| i)
        .take(positives.len())
        .collect();

    if negatives.len() < positives.len() {
        log::warn!(
            "Only {} non-default rows for {} default rows; classes stay imbalanced",
            negatives.len(),
            positives.len()
        );
    }

    positives.into_iter().chain(negatives).collect()
}

/// Shuffle rows and split off `1 - train_fraction` of them as a test set.
///
/// The training set gets `floor(train_fraction * n)` rows and the test set the rest.
pub fn train_test_split<R: Rng + ?Sized>(
    features: &Array2<f64>,
    labels: &Array1<usize>,
    train_fraction: f64,
    rng: &mut R,
) -> crate::Result<(Array2<f64>, Array2<f64>, Array1<usize>, Array1<usize>)> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        anyhow::bail!("Train fraction must be between 0 and 1 (got {})", train_fraction);
    }
    if features.nrows() != labels.len() {
        anyhow::bail!(
            "Feature matrix has {} rows but {} labels",
            features.nrows(),
            labels.len()
        );
    }

    let n = labels.len();
    let n_train = (train_fraction * n as f64).floor() as usize;
    let n_test = n - n_train;

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let (test_idx, train_idx) = indices.split_at(n_test);

    log::debug!("Split {} rows into {} train / {} test", n, n_train, n_test);

    Ok((
        features.select(Axis(0), train_idx),
        features.select(Axis(0), test_idx),
        labels.select(Axis(0), train_idx),
        labels.select(Axis(0), test_idx),
    ))
}

/// 2-D points read from CSV, with labels when the file carries them
#[derive(Debug)]
pub struct PointSet {
    pub points: Array2<f64>,
    pub labels: Option<Array1<usize>>,
}

/// Load a point set from a CSV file with `x`, `y` and an optional `label` column
pub fn load_points(file_path: &Path) -> crate::Result<PointSet> {
    let df = read_table(file_path)?.collect()?;

    let xs = required_f64(&df, "x")?;
    let ys = required_f64(&df, "y")?;
    let points = Array2::from_shape_fn((df.height(), 2), |(i, j)| if j == 0 { xs[i] } else { ys[i] });

    let labels: Option<Array1<usize>> = if df.column("label").is_ok() {
        let raw = required_f64(&df, "label")?;
        if let Some(bad) = raw.iter().find(|&&v| v < 0.0 || v.fract() != 0.0) {
            anyhow::bail!("Cluster labels must be non-negative integers (found {})", bad);
        }
        Some(raw.into_iter().map(|v| v as usize).collect())
    } else {
        None
    };

    log::info!(
        "Loaded {} points from {}{}",
        points.nrows(),
        file_path.display(),
        if labels.is_some() { " with labels" } else { "" }
    );

    Ok(PointSet { points, labels })
}

/// Scan a CSV with every column read as a string; callers cast explicitly.
fn read_table(path: &Path) -> crate::Result<LazyFrame> {
    std::fs::metadata(path).with_context(|| format!("Cannot open {}", path.display()))?;

    LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .with_context(|| format!("Failed to read CSV {}", path.display()))
}

fn integer(name: &str) -> Expr {
    col(name).cast(DataType::Int64)
}

/// `when_true` where `condition` holds, else `when_false`
fn indicator(condition: Expr, when_true: i32, when_false: i32) -> Expr {
    when(condition)
        .then(lit(when_true))
        .otherwise(lit(when_false))
}

/// True where the column equals any of `values`
fn any_of(name: &str, values: &[&str]) -> Expr {
    values
        .iter()
        .map(|v| col(name).eq(lit(*v)))
        .reduce(|acc, e| acc.or(e))
        .unwrap_or_else(|| lit(false))
}

fn column_f64(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let values = df
        .column(name)?
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

/// Like [`column_f64`], but a missing or unparseable cell is an error
fn required_f64(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    let values = column.f64()?;
    if let Some(row) = values.into_iter().position(|v| v.is_none()) {
        anyhow::bail!("Column '{}' has a missing or non-numeric value in row {}", name, row + 1);
    }
    Ok(values.into_no_null_iter().collect())
}

fn column_i64(df: &DataFrame, name: &str) -> crate::Result<Vec<i64>> {
    let values = df
        .column(name)?
        .cast(&DataType::Int64)?
        .i64()?
        .into_iter()
        .map(|v| v.unwrap_or(0))
        .collect();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const APPLICATION_HEADER: &str = "ID,CODE_GENDER,FLAG_OWN_CAR,FLAG_OWN_REALTY,CNT_CHILDREN,AMT_INCOME_TOTAL,NAME_INCOME_TYPE,NAME_EDUCATION_TYPE,NAME_FAMILY_STATUS,NAME_HOUSING_TYPE,DAYS_BIRTH,DAYS_EMPLOYED,FLAG_MOBIL,FLAG_WORK_PHONE,FLAG_PHONE,FLAG_EMAIL,OCCUPATION_TYPE,CNT_FAM_MEMBERS";

    fn create_application_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", APPLICATION_HEADER).unwrap();
        writeln!(file, "5008804,M,Y,Y,0,427500.0,Working,Higher education,Civil marriage,Rented apartment,-12005,-4542,1,1,0,0,,2.0").unwrap();
        writeln!(file, "5008805,F,N,Y,1,112500.0,Pensioner,Secondary / secondary special,Widowed,House / apartment,-21474,365243,1,0,0,0,,1.0").unwrap();
        writeln!(file, "5008806,F,N,N,0,270000.0,Commercial associate,Secondary / secondary special,Single / not married,With parents,-19110,-3051,1,0,1,1,Sales staff,1.0").unwrap();
        writeln!(file, "5008807,M,Y,N,2,135000.0,Student,Incomplete higher,Married,House / apartment,-9000,-500,1,0,0,0,Laborers,4.0").unwrap();
        // No credit history: dropped by the join
        writeln!(file, "5008808,F,Y,Y,0,90000.0,Working,Higher education,Married,House / apartment,-15000,-2000,1,0,0,0,Managers,2.0").unwrap();
        file
    }

    fn create_credit_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ID,MONTHS_BALANCE,STATUS").unwrap();
        writeln!(file, "5008806,0,C").unwrap();
        writeln!(file, "5008806,-1,2").unwrap();
        writeln!(file, "5008804,0,C").unwrap();
        writeln!(file, "5008804,-1,1").unwrap();
        writeln!(file, "5008804,-2,X").unwrap();
        writeln!(file, "5008805,0,0").unwrap();
        writeln!(file, "5008807,0,X").unwrap();
        writeln!(file, "5008807,-1,0").unwrap();
        writeln!(file, "5008807,-2,C").unwrap();
        file
    }

    fn config_for(application: &NamedTempFile, credit: &NamedTempFile) -> LoanDataConfig {
        LoanDataConfig {
            application_path: application.path().to_path_buf(),
            credit_path: credit.path().to_path_buf(),
            ..LoanDataConfig::default()
        }
    }

    #[test]
    fn test_load_loan_table_derives_features() {
        let application = create_application_csv();
        let credit = create_credit_csv();
        let table = load_loan_table(&config_for(&application, &credit)).unwrap();

        // 9 joined rows, the unemployed applicant's single row filtered out
        assert_eq!(table.features.shape(), &[8, 11]);
        assert_eq!(table.feature_names, FEATURE_COLUMNS.to_vec());
        assert!(!table.feature_names.iter().any(|n| n == LABEL_COLUMN));

        // Joined rows follow application order, then credit order
        assert_eq!(table.labels, array![0usize, 1, 0, 0, 1, 0, 1, 0]);

        assert_eq!(
            table.features.row(0).to_vec(),
            vec![0.0, 427500.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 12005.0, 4542.0]
        );
        assert_eq!(
            table.features.row(3).to_vec(),
            vec![0.0, 270000.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 19110.0, 3051.0]
        );
        assert_eq!(
            table.features.row(5).to_vec(),
            vec![2.0, 135000.0, 4.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 9000.0, 500.0]
        );
    }

    #[test]
    fn test_days_employed_is_positive_for_retained_rows() {
        let application = create_application_csv();
        let credit = create_credit_csv();
        let table = load_loan_table(&config_for(&application, &credit)).unwrap();

        let employed = table.features.column(10);
        assert!(employed.iter().all(|&d| d > 0.0));
        assert!(!employed.iter().any(|&d| d == -365243.0 || d == 365243.0));
    }

    #[test]
    fn test_row_limit_applies_before_filter() {
        let application = create_application_csv();
        let credit = create_credit_csv();
        let config = LoanDataConfig {
            row_limit: 4,
            ..config_for(&application, &credit)
        };

        let table = load_loan_table(&config).unwrap();
        // First 4 joined rows: three for 5008804, one for the filtered 5008805
        assert_eq!(table.labels, array![0usize, 1, 0]);
    }

    #[test]
    fn test_balance_classes() {
        let labels = array![0usize, 1, 0, 0, 1, 0, 1, 0];
        assert_eq!(balance_classes(&labels), vec![1, 4, 6, 0, 2, 3]);

        // Defaults in the majority: every negative kept, still fewer
        let labels = array![1usize, 1, 0, 1];
        assert_eq!(balance_classes(&labels), vec![0, 1, 3, 2]);

        let labels: Array1<usize> = Array1::zeros(0);
        assert!(balance_classes(&labels).is_empty());
    }

    #[test]
    fn test_load_loan_data_balances_and_splits() {
        let application = create_application_csv();
        let credit = create_credit_csv();
        let split = load_loan_data(&config_for(&application, &credit)).unwrap();

        // 3 defaults and 5 non-defaults: 2 * min(3, 5) rows survive balancing
        let total = split.x_train.nrows() + split.x_test.nrows();
        assert_eq!(total, 6);
        assert_eq!(split.x_train.nrows(), 5);
        assert_eq!(split.x_test.nrows(), 1);
        assert_eq!(split.y_train.len(), 5);
        assert_eq!(split.x_train.ncols(), FEATURE_COLUMNS.len());

        let defaults = split.y_train.iter().chain(split.y_test.iter()).filter(|&&y| y == 1).count();
        assert_eq!(defaults, 3);
    }

    #[test]
    fn test_split_is_reproducible_for_a_seed() {
        let application = create_application_csv();
        let credit = create_credit_csv();
        let config = config_for(&application, &credit);

        let (a_train, a_test, a_ytrain, a_ytest) = load_loan_data(&config).unwrap().into_parts();
        let (b_train, b_test, b_ytrain, b_ytest) = load_loan_data(&config).unwrap().into_parts();
        assert_eq!(a_train, b_train);
        assert_eq!(a_test, b_test);
        assert_eq!(a_ytrain, b_ytrain);
        assert_eq!(a_ytest, b_ytest);
    }

    #[test]
    fn test_train_test_split_sizes() {
        let features = Array2::from_shape_fn((20, 2), |(i, j)| (i * 2 + j) as f64);
        let labels: Array1<usize> = (0..20).map(|i| i % 2).collect();
        let mut rng = StdRng::seed_from_u64(42);

        let (x_train, x_test, y_train, y_test) =
            train_test_split(&features, &labels, 0.9, &mut rng).unwrap();
        assert_eq!(x_train.nrows(), 18);
        assert_eq!(x_test.nrows(), 2);

        // Rows stay paired with their labels
        for (row, &label) in x_train.outer_iter().zip(y_train.iter()) {
            assert_eq!((row[0] as usize / 2) % 2, label);
        }
        for (row, &label) in x_test.outer_iter().zip(y_test.iter()) {
            assert_eq!((row[0] as usize / 2) % 2, label);
        }

        assert!(train_test_split(&features, &labels, 1.0, &mut rng).is_err());
        assert!(train_test_split(&features, &labels, 0.0, &mut rng).is_err());
    }

    #[test]
    fn test_missing_input_file() {
        let credit = create_credit_csv();
        let config = LoanDataConfig {
            application_path: PathBuf::from("does/not/exist.csv"),
            credit_path: credit.path().to_path_buf(),
            ..LoanDataConfig::default()
        };

        let err = load_loan_data(&config).unwrap_err();
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_load_points() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x,y,label").unwrap();
        writeln!(file, "0.5,1.5,0").unwrap();
        writeln!(file, "-2.0,3.25,1").unwrap();

        let set = load_points(file.path()).unwrap();
        assert_eq!(set.points, array![[0.5, 1.5], [-2.0, 3.25]]);
        assert_eq!(set.labels, Some(array![0usize, 1]));

        let mut unlabeled = NamedTempFile::new().unwrap();
        writeln!(unlabeled, "x,y").unwrap();
        writeln!(unlabeled, "1.0,2.0").unwrap();
        let set = load_points(unlabeled.path()).unwrap();
        assert_eq!(set.points.shape(), &[1, 2]);
        assert!(set.labels.is_none());
    }

    #[test]
    fn test_load_points_accepts_whole_number_labels() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x,y,label").unwrap();
        writeln!(file, "0,0,1.0").unwrap();
        writeln!(file, "1,1,2.0").unwrap();

        let set = load_points(file.path()).unwrap();
        assert_eq!(set.labels, Some(array![1usize, 2]));
    }

    #[test]
    fn test_load_points_rejects_unreadable_labels() {
        for bad in ["", "two", "1.5", "-1"] {
            let mut file = NamedTempFile::new().unwrap();
            writeln!(file, "x,y,label").unwrap();
            writeln!(file, "0,0,0").unwrap();
            writeln!(file, "1,1,{}", bad).unwrap();
            assert!(load_points(file.path()).is_err(), "label {:?} was accepted", bad);
        }
    }

    #[test]
    fn test_load_points_rejects_missing_coordinates() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x,y").unwrap();
        writeln!(file, "0.5,1.5").unwrap();
        writeln!(file, "abc,2.0").unwrap();
        let err = load_points(file.path()).unwrap_err();
        assert!(err.to_string().contains("'x'"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x,y,label").unwrap();
        writeln!(file, "0.5,,0").unwrap();
        assert!(load_points(file.path()).is_err());
    }

    #[test]
    fn test_empty_join_yields_empty_split() {
        let mut application = NamedTempFile::new().unwrap();
        writeln!(application, "{}", APPLICATION_HEADER).unwrap();
        writeln!(application, "1,M,Y,Y,0,427500.0,Working,Higher education,Married,Rented apartment,-12005,-4542,1,1,0,0,,2.0").unwrap();
        let mut credit = NamedTempFile::new().unwrap();
        writeln!(credit, "ID,MONTHS_BALANCE,STATUS").unwrap();
        writeln!(credit, "2,0,1").unwrap();

        let split = load_loan_data(&config_for(&application, &credit)).unwrap();
        assert_eq!(split.x_train.shape(), &[0, 11]);
        assert_eq!(split.x_test.shape(), &[0, 11]);
        assert!(split.y_train.is_empty());
        assert!(split.y_test.is_empty());
    }

    #[test]
    fn test_unparseable_income_becomes_nan() {
        let mut application = NamedTempFile::new().unwrap();
        writeln!(application, "{}", APPLICATION_HEADER).unwrap();
        writeln!(application, "7,F,N,Y,1,unknown,Working,Higher education,Married,House / apartment,-15000,-2000,1,0,0,0,Managers,3.0").unwrap();
        let mut credit = NamedTempFile::new().unwrap();
        writeln!(credit, "ID,MONTHS_BALANCE,STATUS").unwrap();
        writeln!(credit, "7,0,C").unwrap();

        let table = load_loan_table(&config_for(&application, &credit)).unwrap();
        assert_eq!(table.features.nrows(), 1);
        assert!(table.features[[0, 1]].is_nan());
        assert_eq!(table.features[[0, 0]], 1.0);
        assert_eq!(table.features[[0, 10]], 2000.0);
    }

    #[test]
    fn test_row_limit_beyond_index_range_keeps_every_row() {
        let application = create_application_csv();
        let credit = create_credit_csv();
        let config = LoanDataConfig {
            row_limit: usize::MAX,
            ..config_for(&application, &credit)
        };

        let table = load_loan_table(&config).unwrap();
        assert_eq!(table.labels.len(), 8);
    }
}
