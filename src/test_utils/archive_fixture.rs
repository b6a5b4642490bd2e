//! Builders for zip archives shaped like B3 trade files

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Header row of the B3 trade payload
pub const PAYLOAD_HEADER: &str = "DataReferencia;CodigoInstrumento;AcaoAtualizacao;PrecoNegocio;\
QuantidadeNegociada;HoraFechamento;CodigoIdentificadorNegocio;TipoSessaoPregao;DataNegocio;\
CodigoParticipanteComprador;CodigoParticipanteVendedor";

/// One member written into a fixture archive
pub struct ArchiveMember {
    pub name: String,
    pub contents: Vec<u8>,
}

impl ArchiveMember {
    pub fn new(name: &str, contents: &str) -> Self {
        Self {
            name: name.to_string(),
            contents: contents.as_bytes().to_vec(),
        }
    }

    /// A member whose payload is not necessarily valid UTF-8
    pub fn from_bytes(name: &str, contents: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            contents,
        }
    }
}

/// Write `members` as a deflated zip archive at `path`
pub fn write_archive(path: &Path, members: &[ArchiveMember]) -> ZipResult<()> {
    let mut writer = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for member in members {
        writer.start_file(member.name.as_str(), options)?;
        writer.write_all(&member.contents)?;
    }
    writer.finish()?;
    Ok(())
}

/// One payload row with the given field values at their schema positions
pub fn trade_row(ticker: &str, gross_amount: &str, quantity: i64, entry_time: &str, date: &str) -> String {
    format!(
        "{date};{ticker};0;{gross_amount};{quantity};{entry_time};10;1;{date};8;72",
        date = date,
        ticker = ticker,
        gross_amount = gross_amount,
        quantity = quantity,
        entry_time = entry_time,
    )
}

/// `count` distinct rows for `ticker`; quantities run from 1 to `count`
pub fn trade_rows(ticker: &str, date: &str, count: usize) -> Vec<String> {
    (1..=count)
        .map(|n| trade_row(ticker, &format!("{},{:02}", 10 + n, n % 100), n as i64, "100000000", date))
        .collect()
}

/// Payload text: header followed by `rows`
pub fn payload(rows: &[String]) -> String {
    let mut text = String::from(PAYLOAD_HEADER);
    text.push('\n');
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

/// Write `{dir}/{file_name}` holding one `.txt` payload with a header and `rows`
pub fn write_trade_archive(dir: &Path, file_name: &str, rows: &[String]) -> ZipResult<PathBuf> {
    let path = dir.join(file_name);
    let member = format!("{}.txt", file_name.trim_end_matches(".zip"));
    write_archive(&path, &[ArchiveMember::new(&member, &payload(rows))])?;
    Ok(path)
}
