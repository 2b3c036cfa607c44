// Compile a sorted word list into a dictionary and probe it.
//
// Reads one key per line from the given file (which must already be sorted),
// assigns each key its line number as the value, writes the dictionary next
// to the input, and looks a few keys back up through the persisted encoding.
//
// Run:
//   cargo run -p minidict-fsa --example compile_sorted -- /usr/share/dict/words

use std::fs;

use minidict_fsa::generator::Generator;
use minidict_fsa::value_store::U64ValueStore;

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/usr/share/dict/words".to_string());

    let text = fs::read_to_string(&path).expect("failed to read word list");
    let keys: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    println!("read {}: {} keys", path, keys.len());

    let mut generator = Generator::new(U64ValueStore);
    for (line, key) in keys.iter().enumerate() {
        if let Err(err) = generator.add(key.as_bytes(), line as u64 + 1) {
            eprintln!("line {}: {} -- {}", line + 1, key, err);
            std::process::exit(1);
        }
    }
    generator.close_feeding().expect("close_feeding");

    println!(
        "compiled: {} keys, {} states, {} slots",
        generator.key_count().unwrap(),
        generator.state_count().unwrap(),
        generator.arena().unwrap().len()
    );

    let out_path = format!("{path}.minidict");
    let mut file = fs::File::create(&out_path).expect("create output");
    generator.write(&mut file).expect("write dictionary");
    println!("wrote {out_path}");

    // probe a few keys through the persisted encoding
    let arena = generator.arena().unwrap();
    let start = generator.start_state().unwrap();
    for key in keys.iter().step_by((keys.len() / 5).max(1)).take(5) {
        let mut state = start;
        let mut found = true;
        for &byte in key.as_bytes() {
            match arena.target_of(state, byte) {
                Some(next) => state = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        let value = if found { arena.final_value_of(state) } else { None };
        match value {
            Some(line) => println!("{key:24} -> line {line}"),
            None => println!("{key:24} -> MISSING"),
        }
    }
}
