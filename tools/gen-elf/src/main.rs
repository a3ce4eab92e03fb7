use anyhow::Result;
use clap::Parser;
use gen_elf::{Class, ElfWriterConfig, Endianness, NoteElfWriter, gnu_note_sections};
use std::path::{Path, PathBuf};

fn gen_note_elf(out_path: &Path, args: &Args) -> Result<()> {
    let (class, endian) = (args.class, args.endian);
    let mut out = out_path.to_path_buf();
    if out.extension().and_then(|s| s.to_str()) != Some("so") {
        out.set_extension("so");
    }
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = ElfWriterConfig::default()
        .with_class(class)
        .with_endian(endian)
        .with_note_sections(!args.segments_only)
        .with_rodata(!args.no_rodata);
    let writer = NoteElfWriter::new(config);
    let output = writer.write_file(&out, &gnu_note_sections(class, endian))?;
    for section in &output.sections {
        println!(
            "  {:<20} offset 0x{:06x} size 0x{:04x}",
            section.name, section.offset, section.size
        );
    }
    println!("Wrote {}", out.display());
    Ok(())
}

#[derive(Parser)]
#[command(name = "gen-elf")]
struct Args {
    /// Output file for the generated ELF
    #[arg(short)]
    output: Option<PathBuf>,
    /// Word size of the generated ELF
    #[arg(short, long, value_enum, default_value_t = Class::Elf64)]
    class: Class,
    /// Byte order of the generated ELF
    #[arg(short, long, value_enum, default_value_t = Endianness::Little)]
    endian: Endianness,
    /// Only describe the notes through PT_NOTE segments
    #[arg(short, action = clap::ArgAction::SetTrue)]
    segments_only: bool,
    /// Let the notes end the read-only PT_LOAD instead of placing .rodata after them
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_rodata: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let output = match args.output {
        Some(p) => p,
        None => {
            let mut cwd = std::env::current_dir()?;
            cwd.push("out");
            cwd.push("notes");
            cwd
        }
    };

    println!(
        "out: {}\nclass: {:?}\nendian: {:?}\nsegments only: {}\nrodata: {}",
        output.display(),
        args.class,
        args.endian,
        args.segments_only,
        !args.no_rodata
    );

    gen_note_elf(&output, &args)?;

    Ok(())
}
