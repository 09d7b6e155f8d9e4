//! Generate Python stub files for fluid.
//!
//! Run with: cargo run --bin stub_gen

use pyo3_stub_gen::Result;

fn main() -> Result<()> {
    let stub = fluid::stub_info()?;
    stub.generate()?;
    Ok(())
}
