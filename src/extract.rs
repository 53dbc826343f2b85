//! Extracción de texto plano a partir de los bytes de un fichero subido.
//!
//! El conjunto de tipos soportados es cerrado (PDF, DOCX, TXT), así que el
//! despacho es un `match` sobre [`DocumentType`].

use std::{
    io::{Cursor, Read},
    path::Path,
};

use mime_guess::MimeGuess;
use quick_xml::{events::Event, Reader};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    Pdf,
    Docx,
    Txt,
}

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

impl DocumentType {
    /// Interpreta un tipo declarado: extensión (`pdf`, `.DOCX`) o MIME (`application/pdf`).
    pub fn from_declared(declared: &str) -> Result<Self> {
        let normalized = declared.trim().trim_start_matches('.').to_lowercase();
        match normalized.as_str() {
            "pdf" | "application/pdf" => Ok(Self::Pdf),
            "docx" | DOCX_MIME => Ok(Self::Docx),
            "txt" | "text/plain" => Ok(Self::Txt),
            _ => Err(RagError::UnsupportedType(declared.to_string())),
        }
    }

    /// Deduce el tipo a partir del nombre del fichero.
    pub fn from_filename(filename: &str) -> Result<Self> {
        let guess: MimeGuess = MimeGuess::from_path(filename);
        if let Some(doc_type) = guess
            .iter()
            .find_map(|mime| Self::from_declared(mime.essence_str()).ok())
        {
            return Ok(doc_type);
        }

        let extension = Path::new(filename)
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("");
        Self::from_declared(extension).map_err(|_| RagError::UnsupportedType(filename.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
        }
    }
}

/// Convierte los bytes de un documento en texto plano.
///
/// `filename` sólo se usa para los mensajes de error.
pub fn extract(bytes: &[u8], doc_type: DocumentType, filename: &str) -> Result<String> {
    let result = match doc_type {
        DocumentType::Pdf => extract_pdf(bytes),
        DocumentType::Docx => extract_docx(bytes),
        DocumentType::Txt => Ok(extract_txt(bytes)),
    };

    match result {
        Ok(text) => {
            debug!("Extraídos {} caracteres de {} ({})", text.chars().count(), filename, doc_type.as_str());
            Ok(text)
        }
        Err(message) => {
            warn!("No se pudo extraer texto de {}: {}", filename, message);
            Err(RagError::Extraction {
                filename: filename.to_string(),
                message,
            })
        }
    }
}

/// Igual que [`extract`], pero en un hilo bloqueante de tokio.
///
/// Los parsers de PDF pueden entrar en pánico con ficheros malformados; el
/// pánico queda confinado a la tarea y se devuelve como `Extraction`.
pub async fn extract_blocking(bytes: Vec<u8>, doc_type: DocumentType, filename: &str) -> Result<String> {
    let name = filename.to_string();
    tokio::task::spawn_blocking(move || extract(&bytes, doc_type, &name))
        .await
        .unwrap_or_else(|join_err| {
            warn!("El extractor falló de forma inesperada con {}: {}", filename, join_err);
            Err(RagError::Extraction {
                filename: filename.to_string(),
                message: "el parser abortó al procesar el fichero".to_string(),
            })
        })
}

fn extract_pdf(bytes: &[u8]) -> std::result::Result<String, String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| e.to_string())?;
    Ok(pages.join("\n"))
}

fn extract_txt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("DOCX no es un zip válido: {e}"))?;
    let mut xml = String::new();
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("falta word/document.xml: {e}"))?;
    entry.read_to_string(&mut xml).map_err(|e| e.to_string())?;
    docx_xml_to_text(&xml)
}

/// Recorre `word/document.xml` y devuelve el texto de cada párrafo `w:p`,
/// un párrafo por línea.
fn docx_xml_to_text(xml: &str) -> std::result::Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::Text(t) if in_text_run => {
                current.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}
