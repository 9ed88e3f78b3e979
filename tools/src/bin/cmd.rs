// Command line utility for two-condition differential expression

use anyhow::{bail, format_err, Context, Error};
use clap::{value_parser, Arg, ArgAction, Command};
use de_types::{Condition, CountMatrix, Experiment, SampleGroup};
use diff_exp::diff_exp::default_prior_weight_grid;
use diff_exp::{run_diff_exp, sweep_prior_weights, DiffExpConfig, EngineOutput, PipelineResult};
use flate2::read::MultiGzDecoder;
use log::{info, warn};
use ndarray::Array2;
use serde_json::json;
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

pub fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    let matches = Command::new("diff-exp-cmd")
        .arg(
            Arg::new("COUNTS")
                .help("gene x sample counts table (csv or tsv, optionally gzipped)")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("GROUPS")
                .help("two-column sample,group table; the first group seen is condition A")
                .required(true)
                .index(2)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CONFIG")
                .help("JSON file with pipeline parameters")
                .long("config")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PRIOR_WEIGHT")
                .help("Prior weight of the common dispersion")
                .long("prior-weight")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("Q_THRESHOLD")
                .help("q-value threshold for significance calls")
                .long("q-threshold")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("TOP_N")
                .help("Length of the top-gene lists compared between engines")
                .long("top-n")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("SWEEP")
                .help("Prior weights to summarize tagwise dispersions at; 'default' picks a grid")
                .long("sweep")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("FILTER_CPM")
                .help("Keep genes with at least this many counts per million ...")
                .long("filter-cpm")
                .requires("FILTER_MIN_SAMPLES")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("FILTER_MIN_SAMPLES")
                .help("... in at least this many samples")
                .long("filter-min-samples")
                .requires("FILTER_CPM")
                .value_parser(value_parser!(usize)),
        )
        .get_matches();

    let counts_path: &PathBuf = matches
        .get_one("COUNTS")
        .ok_or_else(|| format_err!("no counts table"))?;
    let groups_path: &PathBuf = matches
        .get_one("GROUPS")
        .ok_or_else(|| format_err!("no group table"))?;
    let out_dir: &PathBuf = matches
        .get_one("OUT_DIR")
        .ok_or_else(|| format_err!("no output directory"))?;

    let mut config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => load_config(path)?,
        None => DiffExpConfig::default(),
    };
    if let Some(&w) = matches.get_one::<f64>("PRIOR_WEIGHT") {
        config.dispersion.prior_weight = Some(w);
    }
    if let Some(&q) = matches.get_one::<f64>("Q_THRESHOLD") {
        config.q_threshold = q;
    }
    if let Some(&n) = matches.get_one::<usize>("TOP_N") {
        config.top_n = n;
    }

    let matrix = load_counts(counts_path)?;
    let groups = load_groups(groups_path)?;
    info!(
        "loaded {} genes x {} samples; A = {}, B = {}",
        matrix.n_genes(),
        matrix.n_samples(),
        groups.label(Condition::A),
        groups.label(Condition::B)
    );

    let (experiment, dropped) = match (
        matches.get_one::<f64>("FILTER_CPM"),
        matches.get_one::<usize>("FILTER_MIN_SAMPLES"),
    ) {
        (Some(&cpm), Some(&k)) => Experiment::filter_by_cpm(matrix, groups, cpm, k)?,
        _ => Experiment::filtered(matrix, groups)?,
    };
    if !dropped.is_empty() {
        warn!("dropped {} genes before testing", dropped.len());
    }

    let result = run_diff_exp(&experiment, &config).context("differential expression failed")?;

    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    engine_to_csv(&result.exact, out_dir.join("exact_test.csv"))?;
    engine_to_csv(&result.moderated, out_dir.join("moderated_t.csv"))?;
    dispersion_to_csv(&result, out_dir.join("dispersion.csv"))?;
    write_summary(&experiment, &result, &config, &dropped, out_dir.join("summary.json"))?;

    if let Some(values) = matches.get_many::<String>("SWEEP") {
        let values = values.map(String::as_str).collect::<Vec<&str>>();
        let weights = if values == ["default"] {
            default_prior_weight_grid(experiment.matrix().n_samples(), &config.dispersion)?
        } else {
            values
                .iter()
                .map(|v| v.trim().parse::<f64>().with_context(|| format!("bad prior weight '{v}'")))
                .collect::<Result<Vec<f64>, Error>>()?
        };
        let sweep = sweep_prior_weights(&result.dispersion, &weights)?;
        let mut writer = csv::Writer::from_path(out_dir.join("dispersion_sweep.csv"))?;
        writer.write_record(["prior_weight", "min", "q1", "median", "q3", "max", "iqr", "outliers"])?;
        for (w, s) in sweep {
            writer.serialize((w, s.min, s.q1, s.median, s.q3, s.max, s.spread, s.outliers))?;
        }
        writer.flush()?;
    }

    info!("results written to {}", out_dir.display());
    Ok(())
}

fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read>, Error> {
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let gz = path.extension().map_or(false, |e| e == "gz");
    Ok(if gz {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    })
}

/// Tab separated when the name (before any `.gz`) ends in `.tsv` or `.txt`
fn delimiter(path: &Path) -> u8 {
    let name = path.to_string_lossy();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    if name.ends_with(".tsv") || name.ends_with(".txt") {
        b'\t'
    } else {
        b','
    }
}

fn load_config(path: &Path) -> Result<DiffExpConfig, Error> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing {}", path.display()))
}

pub fn load_counts(path: &Path) -> Result<CountMatrix, Error> {
    read_counts(open_maybe_gz(path)?, delimiter(path), &path.display().to_string())
}

/// Header row holds the sample ids after one leading gene-id column
fn read_counts<R: Read>(input: R, delimiter: u8, name: &str) -> Result<CountMatrix, Error> {
    let mut reader = csv::ReaderBuilder::new().delimiter(delimiter).from_reader(input);
    let samples = reader.headers()?.iter().skip(1).map(str::to_owned).collect::<Vec<String>>();
    if samples.is_empty() {
        bail!("{name}: header lists no samples");
    }

    let mut genes = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{name}: line {}", line + 2))?;
        let mut fields = record.iter();
        let gene = fields
            .next()
            .ok_or_else(|| format_err!("{name}: empty row {}", line + 2))?;
        genes.push(gene.to_owned());
        let row = fields
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .with_context(|| format!("{name}: gene {gene}"))?;
        if row.len() != samples.len() {
            bail!("{name}: gene {gene} has {} values for {} samples", row.len(), samples.len());
        }
        values.extend(row);
    }

    let counts = Array2::from_shape_vec((genes.len(), samples.len()), values)?;
    Ok(CountMatrix::new(genes, samples, counts)?)
}

pub fn load_groups(path: &Path) -> Result<SampleGroup, Error> {
    read_groups(open_maybe_gz(path)?, delimiter(path), &path.display().to_string())
}

/// `sample,group` rows after a header; the first label seen becomes condition A
fn read_groups<R: Read>(input: R, delimiter: u8, name: &str) -> Result<SampleGroup, Error> {
    let mut reader = csv::ReaderBuilder::new().delimiter(delimiter).from_reader(input);
    let pairs = reader
        .records()
        .map(|r| {
            let r = r?;
            match (r.get(0), r.get(1)) {
                (Some(s), Some(g)) => Ok((s.trim().to_owned(), g.trim().to_owned())),
                _ => Err(format_err!("{name}: expected sample,group rows")),
            }
        })
        .collect::<Result<Vec<(String, String)>, Error>>()?;
    Ok(SampleGroup::from_pairs(&pairs)?)
}

fn engine_to_csv(engine: &EngineOutput, path: impl AsRef<Path>) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path.as_ref())?));
    writer.write_record(["gene", "log2_fold_change", "statistic", "p_value", "q_value"])?;
    let rows = engine
        .results
        .gene_ids()
        .iter()
        .zip(engine.results.results())
        .zip(engine.q_values());
    for ((gene, r), q) in rows {
        writer.serialize((gene, r.log2_fold_change, r.statistic, r.p_value, q))?;
    }
    writer.flush()?;
    Ok(())
}

fn dispersion_to_csv(result: &PipelineResult, path: impl AsRef<Path>) -> Result<(), Error> {
    let d = &result.dispersion;
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path.as_ref())?));
    writer.write_record(["gene", "raw", "tagwise", "common"])?;
    for ((gene, raw), tagwise) in result.exact.results.gene_ids().iter().zip(d.raw()).zip(d.tagwise()) {
        writer.serialize((gene, raw, tagwise, d.common()))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_summary(
    experiment: &Experiment,
    result: &PipelineResult,
    config: &DiffExpConfig,
    dropped: &[String],
    path: impl AsRef<Path>,
) -> Result<(), Error> {
    let summary = json!({
        "n_genes": experiment.matrix().n_genes(),
        "dropped_genes": dropped,
        "samples": experiment.matrix().sample_ids(),
        "normalization": result.factors,
        "dispersion": {
            "common": result.dispersion.common(),
            "prior_weight": result.dispersion.prior_weight(),
            "tagwise": result.dispersion.summary(),
        },
        "variance_prior": result.variance_prior,
        "pi0": {
            "exact_test": result.exact.qvalues.pi0,
            "moderated_t": result.moderated.qvalues.pi0,
        },
        "concordance": result.concordance,
        "top_n": result.top_n,
        "config": config,
    });
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(writer, &summary)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_delimiter() {
        assert_eq!(delimiter(Path::new("counts.csv")), b',');
        assert_eq!(delimiter(Path::new("counts.tsv.gz")), b'\t');
        assert_eq!(delimiter(Path::new("dir/counts.txt")), b'\t');
        assert_eq!(delimiter(Path::new("counts.csv.gz")), b',');
    }

    #[test]
    fn test_read_counts() {
        let table = "gene\ta1\ta2\tb1\tb2\nACTB\t10\t12\t9\t11\nGAPDH\t0\t3\t 4 \t5\n";
        let m = read_counts(table.as_bytes(), b'\t', "counts.tsv").unwrap();
        assert_eq!(m.n_genes(), 2);
        assert_eq!(m.sample_ids(), ["a1", "a2", "b1", "b2"]);
        assert_eq!(m.gene_index("GAPDH"), Some(1));
        assert_eq!(m.row(1).to_vec(), vec![0.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_read_counts_rejects_bad_tables() {
        let ragged = "gene,a1,a2\ng1,1,2\ng2,3\n";
        assert!(read_counts(ragged.as_bytes(), b',', "ragged.csv").is_err());
        let text = "gene,a1,a2\ng1,1,two\n";
        let err = read_counts(text.as_bytes(), b',', "text.csv").unwrap_err();
        assert!(format!("{err:#}").contains("gene g1"), "{err:#}");
        let no_samples = "gene\ng1\n";
        assert!(read_counts(no_samples.as_bytes(), b',', "empty.csv").is_err());
        let negative = "gene,a1,a2\ng1,1,-2\n";
        assert!(read_counts(negative.as_bytes(), b',', "neg.csv").is_err());
    }

    #[test]
    fn test_read_groups_label_order() {
        let table = "sample,group\nb1,treated\na1,control\nb2,treated\na2,control\n";
        let groups = read_groups(table.as_bytes(), b',', "groups.csv").unwrap();
        assert_eq!(groups.label(Condition::A), "treated");
        assert_eq!(groups.label(Condition::B), "control");
        assert_eq!(groups.condition_of("a2"), Some(Condition::B));

        let three = "sample,group\ns1,x\ns2,y\ns3,z\n";
        assert!(read_groups(three.as_bytes(), b',', "groups.csv").is_err());
        let one_column = "sample\ns1\ns2\n";
        assert!(read_groups(one_column.as_bytes(), b',', "groups.csv").is_err());
    }
}
