//! Handling the command line interface
//!
//! This module handles the command line parsing as well as basic information (e.g. help dialog, version information, etc.).
use crate::{
    config::{AnalysisConfig, NpDiameter},
    error::{DfError, DfResult},
    get_version,
    summary::NpomGroup,
};
use clap::{builder::Str, Parser};
use std::path::{Path, PathBuf};

/// Validated command line arguments.
#[derive(Debug)]
pub struct Args {
    /// directory holding the input archive and receiving the summary archive
    pub directory: PathBuf,
    /// position of the first particle to analyse
    pub first: usize,
    /// position of the last particle to analyse, `0` for all
    pub last: usize,
    /// abort on the first failing spectrum
    pub raise_exceptions: bool,
    /// only rebuild the histograms of the newest summary archive
    pub stats_only: bool,
    /// pick the oldest input archive instead of the newest one
    pub oldest: bool,
    /// NPoM groups receiving a histogram
    pub npom_types: Vec<NpomGroup>,
    /// analysis configuration including the particle diameter
    pub config: AnalysisConfig,
}

#[derive(Parser, Default)]
#[command(author, version = Str::from(get_version()), about, long_about = None)]
pub struct PartialArgs {
    /// directory holding the input archive. Defaults to the current directory
    #[arg(short, long)]
    directory: Option<String>,

    /// position of the first particle to analyse
    #[arg(short, long)]
    first: Option<usize>,

    /// position of the last particle to analyse (0 analyses all particles)
    #[arg(short, long)]
    last: Option<usize>,

    /// nanoparticle diameter in nm (40, 50, 60, 70 or 80). Overrides the diameter of the configuration file
    #[arg(short, long)]
    np_size: Option<u32>,

    /// abort on the first spectrum whose analysis fails
    #[arg(long)]
    raise_exceptions: bool,

    /// analysis configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// only rebuild the histograms of the newest summary archive in the directory
    #[arg(long)]
    stats_only: bool,

    /// analyse the oldest input archive instead of the newest one
    #[arg(long)]
    oldest: bool,

    /// comma separated list of NPoM groups receiving a histogram
    #[arg(long, value_delimiter = ',')]
    npom_types: Option<Vec<String>>,
}

/// Checks if the passed directory path is valid.
fn eval_directory_input(directory: &str) -> Option<PathBuf> {
    if directory.is_empty() {
        return Some(PathBuf::from("."));
    }
    let path = Path::new(directory);
    if path.is_dir() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

/// Checks if the passed configuration file path is valid.
fn eval_config_input(config: &str) -> Option<PathBuf> {
    let path = Path::new(config);
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    if path.is_file() && is_yaml {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn eval_np_size_input(size: &u32) -> Option<NpDiameter> {
    NpDiameter::from_nm(*size).ok()
}

fn eval_npom_types_input(names: &[String]) -> Option<Vec<NpomGroup>> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| NpomGroup::from_name(n).ok())
        .collect()
}

/// Evaluates a command line argument with the given function.
///
/// # Errors
///
/// Returns a [`DfError::Console`] naming the flag if the input is invalid.
fn get_arg<I: std::fmt::Debug + ?Sized, T>(
    func: impl Fn(&I) -> Option<T>,
    input: &I,
    flag: &str,
) -> DfResult<T> {
    func(input).ok_or_else(|| DfError::Console(format!("Invalid input for --{flag}: {input:?}")))
}

impl TryFrom<PartialArgs> for Args {
    type Error = DfError;

    fn try_from(part_args: PartialArgs) -> DfResult<Self> {
        let directory = get_arg(
            eval_directory_input,
            part_args.directory.as_deref().unwrap_or_default(),
            "directory",
        )?;
        let mut config = match part_args.config.as_deref() {
            Some(c) => AnalysisConfig::from_yaml_file(&get_arg(eval_config_input, c, "config")?)?,
            None => AnalysisConfig::default(),
        };
        let diameter = match part_args.np_size {
            Some(size) => get_arg(eval_np_size_input, &size, "np-size")?,
            None => config.diameter,
        };
        // the diameter lookup always wins over midpoint and CM limit of the file
        config.set_diameter(diameter);
        let npom_types = match part_args.npom_types {
            Some(names) => get_arg(eval_npom_types_input, names.as_slice(), "npom-types")?,
            None => get_arg(
                eval_npom_types_input,
                config.histogram.npom_types.as_slice(),
                "npom-types",
            )?,
        };
        let first = part_args.first.unwrap_or_default();
        let last = part_args.last.unwrap_or_default();
        if last != 0 && last < first {
            return Err(DfError::Console(format!(
                "last particle ({last}) must not precede the first one ({first})"
            )));
        }
        config.validate()?;
        Ok(Self {
            directory,
            first,
            last,
            raise_exceptions: part_args.raise_exceptions,
            stats_only: part_args.stats_only,
            oldest: part_args.oldest,
            npom_types,
            config,
        })
    }
}

/// Creates the intro line shown on program start.
#[must_use]
fn create_intro() -> String {
    format!(
        "npom_df - darkfield analysis of nanoparticle-on-mirror z-scans\nversion {}",
        get_version()
    )
}

/// Show the program name and version information.
pub fn show_intro() {
    println!("{}", create_intro());
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;

    #[test]
    fn eval_directory_input_test() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();
        assert_eq!(eval_directory_input(""), Some(PathBuf::from(".")));
        assert_eq!(eval_directory_input(dir_str), Some(PathBuf::from(dir_str)));
        assert_eq!(eval_directory_input("non_existent_path/sill_not_existent/"), None);
        let file = dir.path().join("file.h5");
        fs::write(&file, "").unwrap();
        assert_eq!(eval_directory_input(file.to_str().unwrap()), None);
    }
    #[test]
    fn eval_config_input_test() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("config.yaml");
        let yml = dir.path().join("config.YML");
        let txt = dir.path().join("config.txt");
        for path in [&yaml, &yml, &txt] {
            fs::write(path, "bins: 10\n").unwrap();
        }
        assert_eq!(eval_config_input(yaml.to_str().unwrap()), Some(yaml.clone()));
        assert_eq!(eval_config_input(yml.to_str().unwrap()), Some(yml.clone()));
        assert_eq!(eval_config_input(txt.to_str().unwrap()), None);
        assert_eq!(eval_config_input("nonexistent.yaml"), None);
        assert_eq!(eval_config_input(dir.path().to_str().unwrap()), None);
    }
    #[test]
    fn eval_np_size_input_test() {
        assert_eq!(eval_np_size_input(&60), Some(NpDiameter::Nm60));
        assert_eq!(eval_np_size_input(&65), None);
    }
    #[test]
    fn eval_npom_types_input_test() {
        let names = vec!["Doubles".to_owned(), " Ideal NPoMs".to_owned(), String::new()];
        assert_eq!(
            eval_npom_types_input(&names),
            Some(vec![NpomGroup::Doubles, NpomGroup::Ideal])
        );
        assert_eq!(eval_npom_types_input(&["Triples".to_owned()]), None);
    }
    #[test]
    fn get_arg_test() {
        assert_eq!(get_arg(eval_np_size_input, &40, "np-size").unwrap(), NpDiameter::Nm40);
        let error = get_arg(eval_np_size_input, &45, "np-size").unwrap_err();
        assert_eq!(error, DfError::Console("Invalid input for --np-size: 45".into()));
    }
    #[test]
    fn try_from_args_default() {
        let args = Args::try_from(PartialArgs::default()).unwrap();
        assert_eq!(args.directory, PathBuf::from("."));
        assert_eq!(args.first, 0);
        assert_eq!(args.last, 0);
        assert!(!args.raise_exceptions);
        assert!(!args.stats_only);
        assert!(!args.oldest);
        assert_eq!(args.config.diameter, NpDiameter::Nm80);
        assert_eq!(
            args.npom_types,
            vec![
                NpomGroup::All,
                NpomGroup::NonWeirdPeakers,
                NpomGroup::WeirdPeakers,
                NpomGroup::Ideal,
                NpomGroup::Doubles,
                NpomGroup::Singles
            ]
        );
    }
    #[test]
    fn try_from_args_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.yaml");
        fs::write(&config, "diameter: Nm50\n").unwrap();
        let part_args = PartialArgs {
            directory: Some(dir.path().to_str().unwrap().to_owned()),
            first: Some(2),
            last: Some(5),
            config: Some(config.to_str().unwrap().to_owned()),
            npom_types: Some(vec!["Doubles".to_owned()]),
            raise_exceptions: true,
            ..PartialArgs::default()
        };
        let args = Args::try_from(part_args).unwrap();
        assert_eq!(args.directory, dir.path());
        assert_eq!((args.first, args.last), (2, 5));
        assert!(args.raise_exceptions);
        assert_eq!(args.config.diameter, NpDiameter::Nm50);
        assert_eq!(
            args.config.classifier.peak_find_midpoint,
            NpDiameter::Nm50.peak_find_midpoint()
        );
        assert_eq!(args.npom_types, vec![NpomGroup::Doubles]);
        let part_args = PartialArgs {
            config: Some(config.to_str().unwrap().to_owned()),
            np_size: Some(70),
            ..PartialArgs::default()
        };
        assert_eq!(
            Args::try_from(part_args).unwrap().config.diameter,
            NpDiameter::Nm70
        );
    }
    #[test]
    fn try_from_args_invalid() {
        let part_args = PartialArgs {
            np_size: Some(90),
            ..PartialArgs::default()
        };
        assert_matches!(Args::try_from(part_args), Err(DfError::Console(_)));
        let part_args = PartialArgs {
            first: Some(4),
            last: Some(2),
            ..PartialArgs::default()
        };
        assert_matches!(Args::try_from(part_args), Err(DfError::Console(_)));
        let part_args = PartialArgs {
            directory: Some("non_existent_path".to_owned()),
            ..PartialArgs::default()
        };
        assert_matches!(Args::try_from(part_args), Err(DfError::Console(_)));
    }
    #[test]
    fn parse_command_line() {
        let part_args = PartialArgs::try_parse_from([
            "npom_df",
            "-n",
            "60",
            "--npom-types",
            "Doubles,Singles",
            "--stats-only",
            "--oldest",
        ])
        .unwrap();
        let args = Args::try_from(part_args).unwrap();
        assert_eq!(args.config.diameter, NpDiameter::Nm60);
        assert_eq!(args.npom_types, vec![NpomGroup::Doubles, NpomGroup::Singles]);
        assert!(args.stats_only);
        assert!(args.oldest);
    }
    #[test]
    fn intro_test() {
        assert!(create_intro().starts_with("npom_df - darkfield analysis"));
        assert!(create_intro().ends_with(&get_version()));
    }
}
