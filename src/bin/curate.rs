use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    safety_corpus::apps::run_curate(std::env::args().skip(1))
}
