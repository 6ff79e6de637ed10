//! HTML rendering. Every interpolated value goes through `escape`.

use std::fmt::Write as _;

use super::content::{Block, Section, SECTIONS};
use crate::roster::RosterRecord;

const STYLE: &str = "body{font-family:sans-serif;margin:0;display:flex}\
nav{width:16rem;padding:1rem;background:#f3f3f3;min-height:100vh}\
main{padding:1.5rem;flex:1}.login{margin:4rem auto;max-width:22rem}\
.error{color:#a40000}.notice{background:#eef6ff;padding:.5rem;margin:.25rem 0}";

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// "ANA paredes" -> "Ana Paredes": upper-case letters that follow a non-letter, lower-case the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha { out.extend(c.to_lowercase()); } else { out.extend(c.to_uppercase()); }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn document(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html lang=\"es\"><head><meta charset=\"utf-8\"><title>{}</title><style>{}</style></head><body>{}</body></html>",
        escape(title), STYLE, body
    )
}

pub fn login(csrf: &str, max_code_chars: usize, error: Option<&str>) -> String {
    let mut body = String::new();
    body.push_str("<div class=\"login\"><h1>UNCP - MINAS</h1><h2>Acceso Estudiantil</h2>");
    if let Some(msg) = error {
        let _ = write!(body, "<p class=\"error\" role=\"alert\">{}</p>", escape(msg));
    }
    let _ = write!(
        body,
        "<form method=\"post\" action=\"/login\">\
<label for=\"codigo\">Ingresa tu Código de Matrícula</label><br>\
<input id=\"codigo\" name=\"codigo\" maxlength=\"{}\" autocomplete=\"off\" autofocus>\
<input type=\"hidden\" name=\"csrf\" value=\"{}\">\
<button type=\"submit\">Ingresar</button></form></div>",
        max_code_chars,
        escape(csrf)
    );
    document("Facultad de Minas - UNCP", &body)
}

pub fn portal(who: &RosterRecord, csrf: &str, section: &Section) -> String {
    let name = if who.display_name.trim().is_empty() { "Estudiante".to_string() } else { title_case(&who.display_name) };
    let code = if who.identifier.is_empty() { "---" } else { who.identifier.as_str() };

    let mut body = String::new();
    let _ = write!(body, "<nav><p><strong>Hola, {}</strong></p><p>ID: {}</p><hr><ul>", escape(&name), escape(code));
    for s in SECTIONS {
        let current = if s.slug == section.slug { " aria-current=\"page\"" } else { "" };
        let _ = write!(body, "<li><a href=\"/section/{}\"{}>{}</a></li>", s.slug, current, escape(s.menu_label));
    }
    let _ = write!(
        body,
        "</ul><hr><form method=\"post\" action=\"/logout\"><input type=\"hidden\" name=\"csrf\" value=\"{}\">\
<button type=\"submit\">Cerrar Sesión</button></form></nav>",
        escape(csrf)
    );

    let _ = write!(body, "<main><h1>{}</h1>", escape(section.title));
    render_blocks(&mut body, section.blocks);
    body.push_str("</main>");
    document(section.title, &body)
}

fn render_blocks(out: &mut String, blocks: &[Block]) {
    let mut places_open = false;
    for b in blocks {
        let is_place = matches!(b, Block::Place { .. });
        if places_open && !is_place {
            out.push_str("</table>");
            places_open = false;
        }
        match b {
            Block::Heading(t) => { let _ = write!(out, "<h2>{}</h2>", escape(t)); }
            Block::Notice(t) => { let _ = write!(out, "<p class=\"notice\">{}</p>", escape(t)); }
            Block::Item(t) => { let _ = write!(out, "<p>{}</p>", escape(t)); }
            Block::Place { name, lat, lon } => {
                if !places_open {
                    out.push_str("<table><tr><th>Mina</th><th>Latitud</th><th>Longitud</th></tr>");
                    places_open = true;
                }
                let _ = write!(out, "<tr><td>{}</td><td>{:.4}</td><td>{:.4}</td></tr>", escape(name), lat, lon);
            }
        }
    }
    if places_open { out.push_str("</table>"); }
}
