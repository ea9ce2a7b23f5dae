//! esml command line tool
//!
//! Uploads tree models to the model store, runs remote predictions, checks
//! them against the local model and exports stored models.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use esml::config::DEFAULT_CONFIG_FILE;
use esml::harness::{check_prediction_equality, random_rows};
use esml::{
    ClientConfig, Document, EsClient, IfExists, ImportOptions, MLModel, ModelKind,
    ModelTransformer, SupportedModel, DEFAULT_DECIMAL,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "esml")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Import tree models into Elasticsearch and verify remote predictions", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Cluster URL, overrides the config file and ES_URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Configuration file (TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Basic authentication user
    #[arg(long, global = true)]
    username: Option<String>,

    /// Basic authentication password
    #[arg(long, global = true)]
    password: Option<String>,

    /// Encoded API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Args, Debug)]
struct LocalModelArgs {
    /// Model family: sklearn, xgboost or lightgbm
    #[arg(long = "kind")]
    kind: ModelKind,

    /// Model file
    #[arg(long = "model")]
    model: PathBuf,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// CSV file of feature rows
    #[arg(long)]
    data: PathBuf,

    /// The CSV file has no header row
    #[arg(long)]
    no_header: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a local model and upload it
    Import {
        #[command(flatten)]
        local: LocalModelArgs,

        /// Id of the stored model
        #[arg(long)]
        model_id: String,

        /// Comma separated feature names; taken from the model when omitted
        #[arg(long, value_delimiter = ',')]
        feature_names: Option<Vec<String>>,

        /// What to do when the id is taken: fail or replace
        #[arg(long, default_value = "fail")]
        if_exists: IfExists,

        /// Upload the definition as inline JSON
        #[arg(long)]
        no_compress: bool,

        /// Model description
        #[arg(long)]
        description: Option<String>,
    },
    /// Print remote predictions for CSV rows
    Predict {
        /// Id of the stored model
        #[arg(long)]
        model_id: String,

        #[command(flatten)]
        data: DataArgs,
    },
    /// Compare local and remote predictions
    Compare {
        #[command(flatten)]
        local: LocalModelArgs,

        /// Id of the stored model
        #[arg(long)]
        model_id: String,

        #[command(flatten)]
        data: DataArgs,

        /// Decimals both predictions must agree on
        #[arg(long, default_value_t = DEFAULT_DECIMAL)]
        decimal: i32,

        /// Compare this many rows sampled with replacement instead of all rows
        #[arg(long)]
        sample: Option<usize>,

        /// Seed for row sampling
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Delete a stored model
    Delete {
        /// Id of the stored model
        #[arg(long)]
        model_id: String,
    },
    /// Rebuild a stored model locally and optionally predict CSV rows with it
    Export {
        /// Id of the stored model
        #[arg(long)]
        model_id: String,

        /// CSV file with a header row naming the input fields
        #[arg(long)]
        data: Option<PathBuf>,
    },
}

impl ConnectionArgs {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                ClientConfig::load_from_file(DEFAULT_CONFIG_FILE)?
            }
            None => ClientConfig::default(),
        };
        config.apply_environment_overrides()?;

        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if self.username.is_some() {
            config.username = self.username.clone();
        }
        if self.password.is_some() {
            config.password = self.password.clone();
        }
        if self.api_key.is_some() {
            config.api_key = self.api_key.clone();
        }
        if self.insecure {
            config.verify_certs = false;
        }
        config.validate()?;
        Ok(config)
    }
}

impl LocalModelArgs {
    fn load(&self) -> Result<SupportedModel> {
        SupportedModel::load(self.kind, &self.model)
            .with_context(|| format!("Failed to load {} model {}", self.kind, self.model.display()))
    }
}

/// Feature rows of a CSV file; empty cells become NaN.
fn read_csv(path: &Path, has_headers: bool) -> Result<(Option<Vec<String>>, Array2<f64>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = if has_headers {
        Some(reader.headers()?.iter().map(str::to_string).collect::<Vec<_>>())
    } else {
        None
    };

    let mut values = Vec::new();
    let mut ncols = None;
    let mut nrows = 0;
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        match ncols {
            None => ncols = Some(record.len()),
            Some(n) if n != record.len() => {
                bail!("Row {} has {} fields, expected {}", line + 1, record.len(), n)
            }
            Some(_) => {}
        }
        for field in record.iter() {
            let field = field.trim();
            let value = if field.is_empty() {
                f64::NAN
            } else {
                field
                    .parse::<f64>()
                    .with_context(|| format!("Row {}: '{}' is not a number", line + 1, field))?
            };
            values.push(value);
        }
        nrows += 1;
    }
    let data = Array2::from_shape_vec((nrows, ncols.unwrap_or(0)), values)?;
    Ok((headers, data))
}

/// CSV rows as documents keyed by the header row.
fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let mut docs = Vec::new();
    for record in reader.records() {
        let record = record?;
        let doc: Document = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| {
                let value = match v.trim().parse::<f64>() {
                    Ok(n) => Value::from(n),
                    Err(_) => Value::String(v.to_string()),
                };
                (k.to_string(), value)
            })
            .collect();
        docs.push(doc);
    }
    Ok(docs)
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.connection.client_config()?;
    let client = EsClient::from_config(&config)?;
    log::debug!("Using cluster {}", config.url);

    match cli.command {
        Command::Import {
            local,
            model_id,
            feature_names,
            if_exists,
            no_compress,
            description,
        } => {
            let model = local.load()?;
            let feature_names = feature_names.unwrap_or_else(|| model.feature_names());
            let mut options = ImportOptions::default()
                .es_if_exists(if_exists)
                .es_compress_model_definition(client.compress_model_definition() && !no_compress);
            options.description = description;

            let es_model = MLModel::import_model(client, &model_id, &model, &feature_names, options)?;
            println!(
                "Imported {} model '{}' ({} features)",
                es_model.model_type()?,
                es_model.model_id(),
                feature_names.len()
            );
        }
        Command::Predict { model_id, data } => {
            let (_, rows) = read_csv(&data.data, !data.no_header)?;
            let es_model = MLModel::new(client, model_id);
            for prediction in es_model.predict(rows.view())? {
                println!("{}", prediction);
            }
        }
        Command::Compare {
            local,
            model_id,
            data,
            decimal,
            sample,
            seed,
        } => {
            let model = local.load()?;
            let (_, rows) = read_csv(&data.data, !data.no_header)?;
            let rows = match sample {
                Some(size) => random_rows(rows.view(), size, &mut StdRng::seed_from_u64(seed)),
                None => rows,
            };
            let es_model = MLModel::new(client, model_id);
            check_prediction_equality(&es_model, &model, rows.view(), decimal)?;
            println!(
                "{} {} predictions match '{}' to {} decimals",
                rows.nrows(),
                model.kind(),
                es_model.model_id(),
                decimal
            );
        }
        Command::Delete { model_id } => {
            MLModel::new(client, model_id.as_str()).delete_model()?;
            println!("Deleted '{}'", model_id);
        }
        Command::Export { model_id, data } => {
            let es_model = MLModel::new(client, model_id);
            let pipeline = es_model.export_model()?;
            println!(
                "Exported {} model '{}': {} trees, {} preprocessors",
                pipeline.es_model().model_type(),
                es_model.model_id(),
                pipeline.es_model().ensemble().num_trees(),
                pipeline.preprocessors().len()
            );
            println!("Input fields: {}", pipeline.input_field_names().join(","));
            if let Some(path) = data {
                let docs = read_documents(&path)?;
                for prediction in pipeline.predict(&docs)? {
                    println!("{}", prediction);
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_target(false)
        .init();

    run(cli)
}
