use clap::Parser;
use controller_lifecycle::controller::{ComponentConfigManager, CrManager};
use kube::CustomResourceExt;
use controller_lifecycle::crd::ComponentConfig;

/// Print the ComponentConfig CRD, or a sample resource, as YAML
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print a sample ComponentConfig instead of the CRD
    #[arg(long)]
    sample: bool,

    /// Name of the sample resource
    #[arg(long, default_value = "component")]
    name: String,
}

fn main() -> Result<(), serde_yaml::Error> {
    let args = Args::parse();
    if args.sample {
        let mut sample = ComponentConfigManager::new().new_empty();
        sample.metadata.name = Some(args.name);
        print!("{}", serde_yaml::to_string(&sample)?);
    } else {
        print!("{}", serde_yaml::to_string(&ComponentConfig::crd())?);
    }
    Ok(())
}
