//! Board catalog
//!
//! Resolves the config file once at startup: board names to indices, pin
//! names to protocol pin ids, and the group listing served over HTTP.

pub mod model;

pub use model::BoardModel;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::board::BoardTarget;
use crate::config::Config;
use crate::types::{NexusError, Result};

/// A configured board with its resolved model
#[derive(Debug, Clone)]
pub struct CatalogBoard {
    pub index: usize,
    pub name: String,
    pub address: String,
    pub model: Arc<BoardModel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pin {
    pub board: u32,
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub name: String,
    pub pins: Vec<Pin>,
}

#[derive(Serialize)]
struct GroupsResponse<'a> {
    groups: &'a [Group],
}

#[derive(Debug, Clone)]
pub struct Catalog {
    boards: Vec<CatalogBoard>,
    groups: Vec<Group>,
}

impl Catalog {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut models: HashMap<&str, Arc<BoardModel>> = HashMap::new();
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        let mut boards = Vec::with_capacity(config.board_infos.len());

        for (index, info) in config.board_infos.iter().enumerate() {
            let model = match models.get(info.model.as_str()) {
                Some(model) => Arc::clone(model),
                None => {
                    let model = Arc::new(BoardModel::new(&info.model)?);
                    models.insert(info.model.as_str(), Arc::clone(&model));
                    model
                }
            };
            if by_name.insert(info.name.as_str(), index).is_some() {
                return Err(NexusError::Config(format!(
                    "Config: Duplicate board name: {}",
                    info.name
                )));
            }
            boards.push(CatalogBoard {
                index,
                name: info.name.clone(),
                address: info.addr.clone(),
                model,
            });
        }

        let mut groups = Vec::with_capacity(config.group_infos.len());
        for group in &config.group_infos {
            let mut pins = Vec::with_capacity(group.pins.len());
            for pin in &group.pins {
                let board = by_name.get(pin.board.as_str()).map(|i| &boards[*i]).ok_or_else(|| {
                    NexusError::Config(format!("Config: Board name not found: {}", pin.board))
                })?;
                let id = board.model.pin(&pin.id).ok_or_else(|| {
                    NexusError::Config(format!("Config: Pin ID not found: {}", pin.id))
                })?;
                pins.push(Pin {
                    board: board.index as u32,
                    id: u32::from(id),
                    name: pin.name.clone(),
                });
            }
            groups.push(Group {
                name: group.name.clone(),
                pins,
            });
        }

        Ok(Self { boards, groups })
    }

    pub fn boards(&self) -> &[CatalogBoard] {
        &self.boards
    }

    pub fn board(&self, index: usize) -> Option<&CatalogBoard> {
        self.boards.get(index)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Dial targets in board-index order
    pub fn targets(&self) -> Vec<BoardTarget> {
        self.boards
            .iter()
            .map(|b| BoardTarget::new(b.name.clone(), b.address.clone()))
            .collect()
    }

    /// The group listing as served on `/groups`
    pub fn groups_json(&self) -> Result<String> {
        serde_json::to_string(&GroupsResponse {
            groups: &self.groups,
        })
        .map_err(|e| NexusError::Internal(format!("encode groups: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoardInfo, GroupInfo, PinInfo};

    fn board(name: &str, addr: &str) -> BoardInfo {
        BoardInfo {
            model: "stm32f407vet6".into(),
            addr: addr.into(),
            name: name.into(),
        }
    }

    fn pin(board: &str, id: &str, name: &str) -> PinInfo {
        PinInfo {
            board: board.into(),
            id: id.into(),
            name: name.into(),
        }
    }

    fn config() -> Config {
        Config {
            dev: false,
            board_infos: vec![board("left", "10.0.0.1:3030"), board("right", "10.0.0.2:3030")],
            group_infos: vec![GroupInfo {
                name: "lights".into(),
                pins: vec![pin("right", "PB1", "porch"), pin("left", "PA0", "hall")],
            }],
        }
    }

    #[test]
    fn test_resolves_boards_and_pins() {
        let catalog = Catalog::from_config(&config()).unwrap();
        assert_eq!(catalog.boards().len(), 2);
        assert!(Arc::ptr_eq(&catalog.boards()[0].model, &catalog.boards()[1].model));

        let lights = &catalog.groups()[0];
        assert_eq!(
            lights.pins,
            vec![
                Pin { board: 1, id: 17, name: "porch".into() },
                Pin { board: 0, id: 0, name: "hall".into() },
            ]
        );

        let targets = catalog.targets();
        assert_eq!(targets[1], BoardTarget::new("right", "10.0.0.2:3030"));
    }

    #[test]
    fn test_groups_json_shape() {
        let catalog = Catalog::from_config(&config()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&catalog.groups_json().unwrap()).unwrap();
        assert_eq!(value["groups"][0]["name"], "lights");
        assert_eq!(value["groups"][0]["pins"][0]["board"], 1);
        assert_eq!(value["groups"][0]["pins"][0]["id"], 17);
    }

    #[test]
    fn test_unknown_board_or_pin() {
        let mut cfg = config();
        cfg.group_infos[0].pins.push(pin("middle", "PA0", "x"));
        let err = Catalog::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("Board name not found: middle"));

        let mut cfg = config();
        cfg.group_infos[0].pins.push(pin("left", "PZ9", "x"));
        let err = Catalog::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("Pin ID not found: PZ9"));
    }

    #[test]
    fn test_duplicate_board_name() {
        let mut cfg = config();
        cfg.board_infos.push(board("left", "10.0.0.3:3030"));
        assert!(Catalog::from_config(&cfg).is_err());
    }
}
