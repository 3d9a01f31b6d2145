use ascii_table::{Align, AsciiTable};
use tnc_app::soundcard::Soundcard;

/// Lowest modem sample rate any supported mode runs at (§4.1); devices
/// below this can't carry any mode.
const MIN_MODEM_RATE_HZ: u32 = 8000;

fn main() {
    // On some platforms enumerating devices emits junk to the terminal:
    // https://github.com/RustAudio/cpal/issues/384
    // Enumerate first and print at the end to minimise the impact.
    let input_cards = Soundcard::supported_input_cards(MIN_MODEM_RATE_HZ);
    let output_cards = Soundcard::supported_output_cards(MIN_MODEM_RATE_HZ);

    println!("\nDetected sound cards compatible with the soundmodem TNC:");
    generate_table("SOUNDCARD", "INPUT", "OUTPUT", &input_cards, &output_cards);
}

fn generate_table(
    heading: &str,
    input: &str,
    output: &str,
    input_cards: &[String],
    output_cards: &[String],
) {
    let mut merged: Vec<&str> = input_cards
        .iter()
        .chain(output_cards.iter())
        .map(|s| s.as_str())
        .collect();
    merged.sort();
    merged.dedup();
    let yes = "OK";
    let no = "";
    let data = merged.into_iter().map(|c| {
        [
            c,
            if input_cards.iter().any(|s| s == c) {
                yes
            } else {
                no
            },
            if output_cards.iter().any(|s| s == c) {
                yes
            } else {
                no
            },
        ]
    });

    let mut table = AsciiTable::default();
    table.column(0).set_header(heading).set_align(Align::Left);
    table.column(1).set_header(input).set_align(Align::Center);
    table.column(2).set_header(output).set_align(Align::Center);
    table.print(data);
}
