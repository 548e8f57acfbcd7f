//! Console - line commands driving the cosmetics service
//!
//! Each input line is parsed as a subcommand, executed against the service,
//! and answered with a message that keeps success, no-op and each failure
//! kind distinguishable.

use std::fmt::Write as _;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use cosmetics_core::{
    ActivationOutcome, Category, CosmeticsError, CosmeticsService, EntityId, ItemId,
    PermissionResolver, StaticPermissions,
};

/// One console line.
#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

/// Console commands
#[derive(Debug, Subcommand)]
pub enum ConsoleCommand {
    /// Start a session (random entity if omitted)
    Join {
        #[arg(value_parser = parse_entity)]
        entity: Option<EntityId>,
    },

    /// End a session
    Leave {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
    },

    /// Activate an item
    Activate {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
        item: String,
    },

    /// Deactivate an item
    Deactivate {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
        item: String,
    },

    /// Flip an item on or off
    Toggle {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
        item: String,
    },

    /// Buy an item with credits
    Buy {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
        item: String,
    },

    /// Show active items
    Active {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
    },

    /// Check and list achievements
    Achievements {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
    },

    /// Show credit balance
    Balance {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
    },

    /// Add credits
    Give {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
        credits: u64,
    },

    /// Grant a permission flag
    Flag {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
        flag: String,
    },

    /// Set the permission tier
    Tier {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
        tier: u32,
    },

    /// List catalog items
    Items {
        #[arg(value_parser = parse_category)]
        category: Option<Category>,
    },

    /// Show statistics counters
    Stats {
        #[arg(value_parser = parse_entity)]
        entity: EntityId,
    },

    /// Leave every session and exit
    Quit,
}

fn parse_entity(s: &str) -> Result<EntityId, String> {
    EntityId::parse(s).ok_or_else(|| format!("not an entity id: {}", s))
}

fn parse_category(s: &str) -> Result<Category, String> {
    Category::parse(s).ok_or_else(|| {
        let names: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
        format!("unknown category {} (expected one of {})", s, names.join(", "))
    })
}

/// What the loop should do after a line.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Print(String),
    Quit,
}

/// Parse a raw input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Result<ConsoleCommand, clap::Error>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    Some(ConsoleLine::try_parse_from(words).map(|l| l.command))
}

/// User-facing text for a command failure.
pub fn describe(err: &CosmeticsError) -> String {
    match err {
        CosmeticsError::UnknownItem(item) => format!("There is no item called {}", item),
        CosmeticsError::NotOwned { item, .. } => format!("You don't own {}", item),
        CosmeticsError::AccessDenied { item, .. } => format!("You are not allowed to use {}", item),
        CosmeticsError::ActivationSideEffectFailed { item, source } => {
            format!("{} could not be activated: {}", item, source)
        }
        CosmeticsError::NoSession(entity) => format!("{} has no session, join first", entity),
        CosmeticsError::AlreadyOwned(item) => format!("You already own {}", item),
        CosmeticsError::InsufficientCredits { needed, available } => {
            format!("Not enough credits: {} needed, {} available", needed, available)
        }
        CosmeticsError::OracleUnavailable(_) => {
            "Ownership cannot be checked right now, try again later".to_string()
        }
        other => format!("Error: {}", other),
    }
}

/// Console session bound to one service.
pub struct Console {
    service: CosmeticsService,
    permissions: Arc<StaticPermissions>,
}

impl Console {
    pub fn new(service: CosmeticsService, permissions: Arc<StaticPermissions>) -> Self {
        Self {
            service,
            permissions,
        }
    }

    pub fn service(&self) -> &CosmeticsService {
        &self.service
    }

    pub async fn execute(&self, command: ConsoleCommand) -> anyhow::Result<Reply> {
        debug!(?command, "Console command");
        let svc = &self.service;

        let text = match command {
            ConsoleCommand::Join { entity } => {
                let entity = entity.unwrap_or_default();
                let summary = svc.lifecycle.on_session_start(entity).await.await?;
                if summary.already_live {
                    return Ok(Reply::Print(format!("{} has already joined", entity)));
                }
                let mut text = format!("Session started for {}", entity);
                if !summary.restored.is_empty() {
                    let _ = write!(text, "\nRestored: {}", join_ids(&summary.restored));
                }
                if !summary.dropped.is_empty() {
                    let _ = write!(text, "\nNo longer available: {}", join_ids(&summary.dropped));
                }
                text
            }

            ConsoleCommand::Leave { entity } => match svc.lifecycle.on_session_end(entity).await {
                Some(saved) => format!("Session ended for {} ({} items saved)", entity, saved.len()),
                None => format!("{} has no session", entity),
            },

            ConsoleCommand::Activate { entity, item } => {
                let item = ItemId::new(item);
                match svc.registry.activate(&entity, &item).await {
                    Ok(ActivationOutcome::Activated { replaced: Some(old) }) => {
                        let text = format!("Activated {} (replacing {})", item, old);
                        self.with_unlocks(&entity, text).await
                    }
                    Ok(ActivationOutcome::Activated { replaced: None }) => {
                        let text = format!("Activated {}", item);
                        self.with_unlocks(&entity, text).await
                    }
                    Ok(ActivationOutcome::AlreadyActive) => format!("{} is already active", item),
                    Err(e) => describe(&e),
                }
            }

            ConsoleCommand::Deactivate { entity, item } => {
                let item = ItemId::new(item);
                match svc.registry.deactivate(&entity, &item).await {
                    Ok(true) => format!("Deactivated {}", item),
                    Ok(false) => format!("{} is not active", item),
                    Err(e) => describe(&e),
                }
            }

            ConsoleCommand::Toggle { entity, item } => {
                let item = ItemId::new(item);
                match svc.registry.toggle(&entity, &item).await {
                    Ok(true) => {
                        let text = format!("{} is now on", item);
                        self.with_unlocks(&entity, text).await
                    }
                    Ok(false) => format!("{} is now off", item),
                    Err(e) => describe(&e),
                }
            }

            ConsoleCommand::Buy { entity, item } => {
                match svc.shop.purchase(&entity, &ItemId::new(item)).await {
                    Ok(receipt) => {
                        let text = format!(
                            "Bought {} for {} credits ({} left)",
                            receipt.item, receipt.cost, receipt.balance
                        );
                        self.with_unlocks(&entity, text).await
                    }
                    Err(e) => describe(&e),
                }
            }

            ConsoleCommand::Active { entity } => {
                if !svc.registry.has_entity(&entity) {
                    format!("{} has no session", entity)
                } else {
                    let active: Vec<ItemId> = svc.registry.get_active(&entity).into_iter().collect();
                    if active.is_empty() {
                        "Nothing active".to_string()
                    } else {
                        format!("Active: {}", join_ids(&active))
                    }
                }
            }

            ConsoleCommand::Achievements { entity } => {
                svc.achievements.check_all(&entity).await?;
                let granted = svc.achievements.granted(&entity).await?;
                let mut text = format!(
                    "{}/{} achievements",
                    granted.len(),
                    svc.achievements.definitions().len()
                );
                for record in granted {
                    let name = svc
                        .achievements
                        .get(&record.achievement)
                        .map(|d| d.name.as_str())
                        .unwrap_or("?");
                    let _ = write!(
                        text,
                        "\n  {} ({}) at {}",
                        name,
                        record.achievement,
                        record.granted_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                text
            }

            ConsoleCommand::Balance { entity } => {
                format!("{} credits", svc.credits.balance(&entity).await?)
            }

            ConsoleCommand::Give { entity, credits } => {
                let balance = svc.credits.deposit(&entity, credits).await?;
                format!("Gave {} credits ({} total)", credits, balance)
            }

            ConsoleCommand::Flag { entity, flag } => {
                let attrs = self.permissions.attributes(&entity).with_flag(flag.clone());
                self.permissions.set(entity, attrs);
                format!("Granted flag {}", flag)
            }

            ConsoleCommand::Tier { entity, tier } => {
                let mut attrs = self.permissions.attributes(&entity);
                attrs.tier = tier;
                self.permissions.set(entity, attrs);
                format!("Tier set to {}", tier)
            }

            ConsoleCommand::Items { category } => {
                let catalog = svc.catalog.snapshot();
                let items = match category {
                    Some(category) => catalog.list_by_category(category),
                    None => catalog.all(),
                };
                if items.is_empty() {
                    "No items".to_string()
                } else {
                    let mut text = String::new();
                    for item in items {
                        let price = if item.is_free() {
                            "free".to_string()
                        } else {
                            format!("{} credits", item.cost)
                        };
                        let _ = writeln!(
                            text,
                            "{:<16} {:<10} {:<12} {}",
                            item.id.as_str(),
                            item.category.as_str(),
                            price,
                            item.name
                        );
                    }
                    text.trim_end().to_string()
                }
            }

            ConsoleCommand::Stats { entity } => {
                let mut text = String::new();
                for (counter, value) in svc.stats.snapshot(&entity) {
                    let _ = writeln!(text, "{:<16} {}", counter.as_str(), value);
                }
                text.trim_end().to_string()
            }

            ConsoleCommand::Quit => return Ok(Reply::Quit),
        };

        Ok(Reply::Print(text))
    }

    async fn with_unlocks(&self, entity: &EntityId, mut text: String) -> String {
        match self.service.achievements.check_all(entity).await {
            Ok(unlocked) => {
                for id in unlocked {
                    let name = self
                        .service
                        .achievements
                        .get(&id)
                        .map(|d| d.name.clone())
                        .unwrap_or_else(|| id.to_string());
                    let _ = write!(text, "\nAchievement unlocked: {}", name);
                }
            }
            Err(e) => {
                let _ = write!(text, "\n{}", describe(&e));
            }
        }
        text
    }
}

fn join_ids(ids: &[ItemId]) -> String {
    ids.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(", ")
}
