//! CLI subcommand handlers.

use crate::classifier;
use crate::{Commands, ConfigAction, ExplainArgs};
use std::io::Read;
use std::path::Path;
use textanchor_core::{AnchorConfig, AnchorText, OptionMap};
use tracing::info;

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Explain(args) => {
            let output = handle_explain(args, workspace, config_file)?;
            println!("{output}");
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

fn load(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<AnchorConfig> {
    textanchor_core::load_config(Some(workspace), config_file, None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

/// Parse `key=json` pairs; values that are not valid JSON are taken as strings.
pub fn parse_options(pairs: &[String]) -> anyhow::Result<OptionMap> {
    let mut options = OptionMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("option '{pair}' is not of the form key=value"))?;
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        options.insert(key.trim().to_string(), value);
    }
    Ok(options)
}

/// Merge command-line arguments over the loaded configuration.
fn apply_args(config: &mut AnchorConfig, args: &ExplainArgs) -> anyhow::Result<()> {
    if let Some(strategy) = &args.strategy {
        config.explainer.sampling_strategy = strategy.clone();
    }
    if let Some(seed) = args.seed {
        config.explainer.seed = seed;
    }
    if let Some(lexicon) = &args.lexicon {
        config.explainer.lexicon_path = Some(lexicon.clone());
    }
    config.explainer.options.extend(parse_options(&args.options)?);

    if !args.keywords.is_empty() {
        config.classifier.keywords = args.keywords.clone();
    }
    if let Some(command) = &args.classifier_cmd {
        config.classifier.command = Some(command.clone());
    }

    let explain = &mut config.explain;
    if let Some(threshold) = args.threshold {
        explain.threshold = threshold;
    }
    if let Some(beam_size) = args.beam_size {
        explain.beam_size = beam_size;
    }
    if args.max_anchor_size.is_some() {
        explain.max_anchor_size = args.max_anchor_size;
    }
    if let Some(batch_size) = args.batch_size {
        explain.batch_size = batch_size;
    }
    if let Some(coverage_samples) = args.coverage_samples {
        explain.coverage_samples = coverage_samples;
    }
    Ok(())
}

/// Run one explanation and render it as JSON.
pub fn handle_explain(
    args: ExplainArgs,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<String> {
    let mut config = load(workspace, config_file)?;
    apply_args(&mut config, &args)?;

    let text = if args.text == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf.trim_end().to_string()
    } else {
        args.text.clone()
    };

    let classifier = classifier::from_settings(&config.classifier)?;
    let mut explainer = AnchorText::builder(classifier)
        .settings(&config.explainer)?
        .build()?;
    info!(strategy = %explainer.strategy(), seed = explainer.seed(), "Explaining");

    let explanation = explainer.explain(&text, &config.explain)?;
    let rendered = if args.compact {
        explanation.to_json()?
    } else {
        explanation.to_json_pretty()?
    };
    Ok(rendered)
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".textanchor");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&AnchorConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_file)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
