use std::fmt;

/// Game → hall → table lookup data.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    games: Vec<CatalogGame>,
}

#[derive(Debug, Clone)]
pub struct CatalogGame {
    pub name: String,
    pub halls: Vec<CatalogHall>,
}

#[derive(Debug, Clone)]
pub struct CatalogHall {
    pub name: String,
    pub tables: Vec<String>,
    pub dragon_tiger: bool,
}

/// One selectable table. Wire form is `game/hall/table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub game: String,
    pub hall: String,
    pub table: String,
}

impl TableKey {
    pub fn new(game: impl Into<String>, hall: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            hall: hall.into(),
            table: table.into(),
        }
    }

    pub fn parse(wire: &str) -> Option<Self> {
        let mut parts = wire.split('/');
        let game = parts.next()?.trim();
        let hall = parts.next()?.trim();
        let table = parts.next()?.trim();
        if parts.next().is_some() || game.is_empty() || hall.is_empty() || table.is_empty() {
            return None;
        }
        Some(Self::new(game, hall, table))
    }

    /// Short table code for reports: trailing `[A-Z]\d{2,3}` when present.
    pub fn short_name(&self) -> String {
        short_table_name(&self.table)
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.game, self.hall, self.table)
    }
}

pub fn short_table_name(table: &str) -> String {
    let chars: Vec<char> = table.chars().collect();
    let digits = chars
        .iter()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if (2..=3).contains(&digits) && chars.len() > digits {
        let letter = chars[chars.len() - digits - 1];
        if letter.is_ascii_alphabetic() {
            let code: String = chars[chars.len() - digits - 1..].iter().collect();
            return code.to_ascii_uppercase();
        }
    }
    table.to_string()
}

impl TableCatalog {
    pub fn new(games: Vec<CatalogGame>) -> Self {
        Self { games }
    }

    pub fn games(&self) -> &[CatalogGame] {
        &self.games
    }

    pub fn game(&self, name: &str) -> Option<&CatalogGame> {
        self.games.iter().find(|g| g.name == name)
    }

    pub fn hall(&self, game: &str, hall: &str) -> Option<&CatalogHall> {
        self.game(game)?.halls.iter().find(|h| h.name == hall)
    }

    pub fn contains(&self, key: &TableKey) -> bool {
        self.hall(&key.game, &key.hall)
            .map(|h| h.tables.iter().any(|t| *t == key.table))
            .unwrap_or(false)
    }

    pub fn is_dragon_tiger(&self, key: &TableKey) -> bool {
        self.hall(&key.game, &key.hall)
            .map(|h| h.dragon_tiger)
            .unwrap_or(false)
    }
}
