fn main() {
    if let Err(err) = canvas_layout_learner::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
