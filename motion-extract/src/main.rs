//! Extract motion vectors of a video into a block motion track.

use anyhow::Result;
use av_decoder::AvDecoder;
use log::*;
use mvtrack::prelude::v1::*;
use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

/// Split the command line into input and output paths.
fn parse_args(args: &[String]) -> Option<(&str, &str)> {
    match args {
        [_, input, output] => Some((input.as_str(), output.as_str())),
        _ => None,
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = std::env::args().collect::<Vec<_>>();

    let (input, output) = match parse_args(&args) {
        Some(paths) => paths,
        None => {
            let program = args.first().map(String::as_str).unwrap_or("motion-extract");
            eprintln!("Usage: {program} <video> <outputMvs>");
            std::process::exit(1);
        }
    };

    let start = Instant::now();

    // Open the input before touching the output, so that a bad input leaves no file behind.
    let mut decoder = AvDecoder::open(input)?;
    decoder.dump_format();

    let out = BufWriter::new(File::create(output)?);
    let mut pipeline = TrackPipeline::new(out);

    // Progress lines are parsed by other tools, keep them on stdout regardless of logging.
    let ret = pipeline.run(&mut decoder, |progress| println!("{progress}"));

    info!(
        "Elapsed time: {:.6} seconds",
        start.elapsed().as_secs_f64()
    );

    let frames = ret?;

    info!("Wrote {frames} frames to {output}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exactly_two_paths() {
        let a = args(&["motion-extract", "in.mp4", "out.mvs"]);
        assert_eq!(parse_args(&a), Some(("in.mp4", "out.mvs")));

        assert_eq!(parse_args(&args(&["motion-extract"])), None);
        assert_eq!(parse_args(&args(&["motion-extract", "in.mp4"])), None);
        assert_eq!(
            parse_args(&args(&["motion-extract", "in.mp4", "out.mvs", "extra"])),
            None
        );
        assert_eq!(parse_args(&[]), None);
    }
}
