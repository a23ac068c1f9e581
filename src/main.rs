//! Load a molecular-dynamics trajectory and summarize the reconstructed atom trajectories.
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;
use mdingest::{AtomSeries, LoadOptions, TrajectoryReader, Window};

/// Read a LAMMPS dump, VASP XDATCAR or GROMACS trr/xtc trajectory and rebuild the positions and
/// velocities of every atom.
#[derive(Parser)]
struct Args {
    /// Trajectory path (`*.lammpstrj[.gz]`, `XDATCAR[.gz]`, `*.trr` or `*.xtc`).
    trajectory: PathBuf,

    /// Coordinates file (`.gro`) with the atom types of a GROMACS trajectory.
    ///
    /// Required for `.trr` trajectories.
    #[arg(short, long)]
    coordinates: Option<PathBuf>,

    /// Time between two retained frames, in picoseconds.
    #[arg(short, long, default_value_t = 1.0)]
    time_step: f64,

    /// Skip the frames up to and including this one. Frames are counted from one.
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Retain every `delta`-th frame.
    #[arg(long, default_value_t = 1)]
    delta: u64,

    /// Stop reading after this frame. A value not larger than `start` reads to the end.
    #[arg(long, default_value_t = 0)]
    end: u64,

    /// Derive the kinematics on a single thread.
    #[arg(long)]
    sequential: bool,

    /// Log what is being read, frame by frame.
    #[arg(long, conflicts_with = "silent")]
    debug: bool,

    /// Only log errors.
    #[arg(long)]
    silent: bool,

    /// Print the mean position of every atom to standard output.
    #[arg(long)]
    means: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match (args.debug, args.silent) {
        (true, _) => LevelFilter::Debug,
        (_, true) => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let window = Window::try_new(args.start, args.delta, args.end)?;
    let mut options = LoadOptions::new(&args.trajectory)
        .time_step(args.time_step)
        .window(window)
        .parallel(!args.sequential);
    if let Some(coordinates) = &args.coordinates {
        options = options.coordinates(coordinates);
    }

    let mut reader = TrajectoryReader::open(&options)?;
    let series = reader.read_series()?;

    let mut stdout = BufWriter::new(std::io::stdout().lock());
    summarize(&mut stdout, &series)?;
    if args.means {
        write_means(&mut stdout, &series, reader.atom_types())?;
    }
    stdout.flush()?;
    Ok(())
}

fn summarize(out: &mut impl Write, series: &[AtomSeries]) -> std::io::Result<()> {
    let nsamples = series.first().map_or(0, AtomSeries::len);
    writeln!(out, "atoms:\t{}", series.len())?;
    writeln!(out, "samples:\t{nsamples}")?;
    if let Some(first) = series.first() {
        if let (Some(&start), Some(&end)) = (first.time.first(), first.time.last()) {
            writeln!(out, "time:\t{start:.3}\t{end:.3}")?;
        }
        if let Some(lengths) = first.box_at(0) {
            writeln!(out, "box:\t{:.4}\t{:.4}\t{:.4}", lengths.x, lengths.y, lengths.z)?;
        }
    }
    Ok(())
}

fn write_means(
    out: &mut impl Write,
    series: &[AtomSeries],
    types: Option<&mdingest::AtomTypes>,
) -> std::io::Result<()> {
    for (idx, atom) in series.iter().enumerate() {
        let mean = atom.mean_position();
        let name = types.and_then(|types| types.name(atom.atom_type));
        match name {
            Some(name) => write!(out, "{idx}\t{name}")?,
            None => write!(out, "{idx}\t{}", atom.atom_type)?,
        }
        writeln!(out, "\t{:.5}\t{:.5}\t{:.5}", mean.x, mean.y, mean.z)?;
    }
    Ok(())
}
