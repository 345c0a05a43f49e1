use autotowers_lib as at;
use std::env;
use std::io;
use std::process::ExitCode;

fn run() -> Result<(), at::TowerError> {
    let args: Vec<String> = env::args().collect();

    #[derive(Debug)]
    struct Filenames<'a> {
        input: &'a str,
        // output and input can be the same filename; the output isn't replaced until it's complete
        output: &'a str,
        settings: Option<&'a str>,
    }

    let filenames = match args.len() {
        2 if args[1] == "--presets" => {
            let presets = serde_json::to_string_pretty(&at::presets::LINEAR_ADVANCE_PRESETS)?;
            println!("{}", presets);
            return Ok(());
        }
        3 => Filenames { input: &args[1], output: &args[2], settings: None },
        4 => Filenames { input: &args[1], output: &args[2], settings: Some(&args[3]) },
        _ => {
            eprintln!("usage:\nautotowers input.gcode output.gcode [settings.json]\nor\nautotowers --presets");
            return Ok(());
        }
    };

    dbg!(&filenames);

    let config = match filenames.settings {
        Some(settings) => at::PostProcessConfig::load(settings)?,
        None => at::PostProcessConfig::default(),
    };

    println!("post-processing {} into {}", filenames.input, filenames.output);
    let report = at::process_files(filenames.input, filenames.output, &config)?;
    let kfactors: Vec<String> = report.kfactors.iter().map(|k| at::la_tower::format_kfactor(*k)).collect();
    println!(
        "done - sections: {} K-factors: [{}] neutralized M900 lines: {}",
        report.sections(),
        kfactors.join(", "),
        report.neutralized_lines
    );
    Ok(())
}

// Library warnings (unreadable layer heights, a tower that is one section) go to stderr.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    init_logging();
    println!("autotowers starting");
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("autotowers failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
