//! Minimal PDF writer for transcripts
//!
//! Produces a PDF 1.4 file using the built-in Helvetica font, so no font data
//! is embedded. Text is encoded as WinAnsi; anything outside it becomes `?`.

use serde::{Deserialize, Serialize};

use crate::conversation::Exchange;

/// Page geometry in PDF points (1/72 inch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfLayout {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub font_size: f32,
    pub line_height: f32,
    /// Extra space after each exchange
    pub exchange_gap: f32,
    /// Answers longer than this are cut and suffixed with `...`
    pub max_answer_chars: usize,
}

impl Default for PdfLayout {
    fn default() -> Self {
        // A4
        Self {
            page_width: 595.0,
            page_height: 842.0,
            margin: 40.0,
            font_size: 11.0,
            line_height: 16.0,
            exchange_gap: 8.0,
            max_answer_chars: 100,
        }
    }
}

impl PdfLayout {
    /// Vertical space taken by one exchange
    pub fn exchange_advance(&self) -> f32 {
        2.0 * self.line_height + self.exchange_gap
    }

    fn bottom_limit(&self) -> f32 {
        self.page_height - self.margin
    }
}

/// A line of text placed on a page; `y` is measured down from the top edge
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub y: f32,
    pub text: String,
}

/// Lay exchanges out top to bottom, starting a new page whenever the next
/// exchange would cross the bottom margin.
pub fn paginate(messages: &[Exchange], layout: &PdfLayout) -> Vec<Vec<PlacedLine>> {
    let mut pages = Vec::new();
    let mut page: Vec<PlacedLine> = Vec::new();
    let mut cursor = layout.margin;

    for exchange in messages {
        let needed = 2.0 * layout.line_height;
        if cursor + needed > layout.bottom_limit() && !page.is_empty() {
            pages.push(std::mem::take(&mut page));
            cursor = layout.margin;
        }

        page.push(PlacedLine {
            y: cursor,
            text: format!("Question: {}", single_line(&exchange.question)),
        });
        page.push(PlacedLine {
            y: cursor + layout.line_height,
            text: format!(
                "Answer: {}",
                truncate(&single_line(&exchange.answer), layout.max_answer_chars)
            ),
        });
        cursor += layout.exchange_advance();
    }

    pages.push(page);
    pages
}

/// Render exchanges into a complete PDF document
pub fn render_pdf(messages: &[Exchange], layout: &PdfLayout) -> Vec<u8> {
    let pages = paginate(messages, layout);
    let mut writer = PdfWriter::default();

    writer.object(1, b"<< /Type /Catalog /Pages 2 0 R >>");

    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 4 + 2 * i).collect();
    let kids = page_ids
        .iter()
        .map(|id| format!("{} 0 R", id))
        .collect::<Vec<_>>()
        .join(" ");
    writer.object(
        2,
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids, pages.len()).as_bytes(),
    );
    writer.object(
        3,
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
    );

    for (page, page_id) in pages.iter().zip(&page_ids) {
        let content_id = page_id + 1;
        writer.object(
            *page_id,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                layout.page_width, layout.page_height, content_id
            )
            .as_bytes(),
        );
        writer.stream(content_id, &content_stream(page, layout));
    }

    writer.finish(1)
}

fn content_stream(lines: &[PlacedLine], layout: &PdfLayout) -> Vec<u8> {
    let mut out = Vec::new();
    for line in lines {
        // PDF's origin is the bottom-left corner and text sits on its baseline
        let baseline = layout.page_height - line.y - layout.font_size;
        out.extend_from_slice(
            format!(
                "BT /F1 {:.2} Tf {:.2} {:.2} Td (",
                layout.font_size, layout.margin, baseline
            )
            .as_bytes(),
        );
        encode_text(&line.text, &mut out);
        out.extend_from_slice(b") Tj ET\n");
    }
    out
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// Escape a string for a PDF literal and encode it as WinAnsi
fn encode_text(text: &str, out: &mut Vec<u8>) {
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            c if (c as u32) < 0x20 => out.push(b' '),
            c if (c as u32) < 0x80 => out.push(c as u8),
            c if (0xA0..=0xFF).contains(&(c as u32)) => out.push(c as u32 as u8),
            '€' => out.push(0x80),
            '…' => out.push(0x85),
            '‘' => out.push(0x91),
            '’' => out.push(0x92),
            '“' => out.push(0x93),
            '”' => out.push(0x94),
            '•' => out.push(0x95),
            '–' => out.push(0x96),
            '—' => out.push(0x97),
            _ => out.push(b'?'),
        }
    }
}

/// Accumulates numbered objects and writes the cross-reference table
#[derive(Default)]
struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<(usize, usize)>,
}

impl PdfWriter {
    fn header(&mut self) {
        if self.buf.is_empty() {
            // Binary comment line marks the file as containing 8-bit data
            self.buf.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        }
    }

    fn object(&mut self, id: usize, body: &[u8]) {
        self.header();
        self.offsets.push((id, self.buf.len()));
        self.buf.extend_from_slice(format!("{} 0 obj\n", id).as_bytes());
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, id: usize, data: &[u8]) {
        let mut body = format!("<< /Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.object(id, &body);
    }

    fn finish(mut self, root: usize) -> Vec<u8> {
        self.header();
        self.offsets.sort_by_key(|(id, _)| *id);
        let size = self.offsets.len() + 1;
        let xref_offset = self.buf.len();

        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", size);
        for (_, offset) in &self.offsets {
            xref.push_str(&format!("{:010} 00000 n \n", offset));
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            size, root, xref_offset
        ));
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }
}
