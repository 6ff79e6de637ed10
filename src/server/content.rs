//! Static portal sections. Pure data; `pages` turns it into HTML.

#[derive(Debug)]
pub enum Block {
    Heading(&'static str),
    Notice(&'static str),
    Item(&'static str),
    Place { name: &'static str, lat: f64, lon: f64 },
}

#[derive(Debug)]
pub struct Section {
    pub slug: &'static str,
    pub menu_label: &'static str,
    pub title: &'static str,
    pub blocks: &'static [Block],
}

pub static SECTIONS: &[Section] = &[
    Section {
        slug: "inicio",
        menu_label: "Inicio / Facultad",
        title: "Bienvenido a la FAIM - UNCP",
        blocks: &[
            Block::Heading("Noticias"),
            Block::Notice("Aviso: los parciales inician el 15 de octubre."),
            Block::Notice("Aniversario del Círculo de Geomecánica."),
            Block::Heading("Seguridad y evacuación"),
            Block::Item("Consulta el plano de seguridad en la entrada de cada pabellón."),
            Block::Heading("Grupos de estudio"),
            Block::Item("Círculo de Geomecánica"),
            Block::Item("Círculo de Seguridad Minera"),
            Block::Item("Círculo de Ventilación"),
        ],
    },
    Section {
        slug: "mapa",
        menu_label: "Mapa Minero",
        title: "Unidades Mineras del Perú",
        blocks: &[
            Block::Place { name: "Antamina", lat: -11.6036, lon: -76.1239 },
            Block::Place { name: "Toquepala", lat: -17.2521, lon: -70.6227 },
            Block::Place { name: "Yanacocha", lat: -7.1421, lon: -78.5218 },
        ],
    },
    Section {
        slug: "laboratorios",
        menu_label: "Laboratorios",
        title: "Laboratorios FAIM",
        blocks: &[
            Block::Item("Mecánica de Rocas"),
            Block::Item("Ventilación"),
            Block::Item("Mineralogía"),
            Block::Item("Topografía"),
        ],
    },
    Section {
        slug: "normativa",
        menu_label: "Normativa",
        title: "Marco Legal",
        blocks: &[
            Block::Item("DS-024: Reglamento de Seguridad y Salud Ocupacional en Minería"),
            Block::Item("Ley General de Minería"),
            Block::Item("Normas ambientales"),
        ],
    },
];

pub fn find_section(slug: &str) -> Option<&'static Section> {
    SECTIONS.iter().find(|s| s.slug == slug)
}

pub fn default_section() -> &'static Section {
    &SECTIONS[0]
}
