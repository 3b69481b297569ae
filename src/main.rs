fn main() {
    if let Err(error) = candle_stream_lib::run() {
        eprintln!("candle-stream failed: {error}");
        std::process::exit(1);
    }
}
