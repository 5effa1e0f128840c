use ::std::{path::PathBuf, process::ExitCode};
use clap::{Parser, Subcommand};
use eld_build_tool::{array_to_blob, default_stem, reencode, train_dir, BuildError, TrainOptions};

#[derive(Parser)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trains an array database from a directory of `<code>.txt` files, one text per line
    Train {
        #[arg(short = 'i', required = true)]
        inp: PathBuf,

        #[arg(short = 'o', required = true)]
        out: PathBuf,

        /// Database name, defaults to the output file stem
        #[arg(long)]
        name: Option<String>,

        /// N-grams kept per language
        #[arg(long)]
        top: Option<usize>,

        #[arg(long, default_value_t = 4)]
        ngram_length: usize,

        #[arg(long, default_value_t = 3)]
        ngram_stride: usize,

        #[arg(long, default_value_t = 8)]
        threads: usize,

        /// Keep printable UTF-8 n-gram keys unescaped
        #[arg(long)]
        raw: bool,
    },
    /// Converts an array database into blob files
    Blob {
        #[arg(short = 'i', required = true)]
        inp: PathBuf,

        /// Output directory
        #[arg(short = 'o', required = true)]
        out: PathBuf,

        #[arg(long)]
        stem: Option<String>,

        /// Language codes to keep, e.g. `en,es`
        #[arg(short = 'l', long, value_delimiter = ',')]
        languages: Vec<String>,
    },
    /// Rewrites an array database
    Encode {
        #[arg(short = 'i', required = true)]
        inp: PathBuf,

        #[arg(short = 'o', required = true)]
        out: PathBuf,

        /// Keep printable UTF-8 n-gram keys unescaped
        #[arg(long)]
        raw: bool,
    },
}

fn run(command: Command) -> Result<(), BuildError> {
    match command {
        Command::Train {
            inp,
            out,
            name,
            top,
            ngram_length,
            ngram_stride,
            threads,
            raw,
        } => {
            let options = TrainOptions {
                name: name.unwrap_or_else(|| default_stem(&out)),
                ngram_length,
                ngram_stride,
                top,
                threads,
            };
            let table = train_dir(&inp, &options)?;
            table.write(&out, !raw)?;
            println!(
                "{:?} written: {} languages, {} ngrams",
                out,
                table.languages().len(),
                table.len()
            );
        }
        Command::Blob {
            inp,
            out,
            stem,
            languages,
        } => {
            let info = array_to_blob(&inp, &out, stem.as_deref(), &languages)?;
            println!(
                "{} written to {:?}: {} slots, score multiplier {}",
                info.name, out, info.slots, info.score_multiplier
            );
        }
        Command::Encode { inp, out, raw } => {
            let count = reencode(&inp, &out, !raw)?;
            println!("{out:?} written: {count} ngrams");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            let mut source = ::std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
