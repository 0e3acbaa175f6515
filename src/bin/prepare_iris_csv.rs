//! Write the Iris dataset to `./data/iris.csv`.
//!
//! The `data` directory must already exist.

fn main() -> anyhow::Result<()> {
    forest_sweep::logging::init();
    let path = forest_sweep::dataset::iris::prepare()?;
    println!("{}", path.display());
    Ok(())
}
