use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// Timeframe bucket an analysis run or trade plan applies to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
pub enum Cycle {
    #[serde(rename = "15m")]
    #[sqlx(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    #[sqlx(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    #[sqlx(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    #[sqlx(rename = "1d")]
    D1,
}

impl Cycle {
    pub const ALL: [Cycle; 4] = [Cycle::M15, Cycle::H1, Cycle::H4, Cycle::D1];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cycle::M15 => "15m",
            Cycle::H1 => "1h",
            Cycle::H4 => "4h",
            Cycle::D1 => "1d",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Cycle::M15 => "15 minutes",
            Cycle::H1 => "1 hour",
            Cycle::H4 => "4 hours",
            Cycle::D1 => "1 day",
        }
    }
}

impl std::fmt::Display for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Cycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "15m" => Ok(Cycle::M15),
            "1h" => Ok(Cycle::H1),
            "4h" => Ok(Cycle::H4),
            "1d" => Ok(Cycle::D1),
            other => Err(format!("unknown cycle '{other}' (expected 15m, 1h, 4h or 1d)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Asset type
// ---------------------------------------------------------------------------

/// Instrument type of an asset. Stored as 0/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetType {
    #[serde(rename = "SPOT")]
    Spot,
    /// USDⓈ-margined perpetual.
    #[serde(rename = "USD_M")]
    UsdM,
    /// Coin-margined perpetual.
    #[serde(rename = "COIN_M")]
    CoinM,
}

impl AssetType {
    pub const ALL: [AssetType; 3] = [AssetType::Spot, AssetType::UsdM, AssetType::CoinM];

    pub fn code(&self) -> i64 {
        match self {
            AssetType::Spot => 0,
            AssetType::UsdM => 1,
            AssetType::CoinM => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AssetType::Spot),
            1 => Some(AssetType::UsdM),
            2 => Some(AssetType::CoinM),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AssetType::Spot => "Spot",
            AssetType::UsdM => "USD-margined futures",
            AssetType::CoinM => "Coin-margined futures",
        }
    }
}

impl TryFrom<i64> for AssetType {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        AssetType::from_code(code).ok_or_else(|| format!("unknown asset type code {code}"))
    }
}

/// Accepts the numeric code ("1") or the name ("USD_M").
impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return AssetType::try_from(code);
        }
        match s.to_ascii_uppercase().as_str() {
            "SPOT" => Ok(AssetType::Spot),
            "USD_M" => Ok(AssetType::UsdM),
            "COIN_M" => Ok(AssetType::CoinM),
            other => Err(format!("unknown asset type '{other}'")),
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetType::Spot => "SPOT",
            AssetType::UsdM => "USD_M",
            AssetType::CoinM => "COIN_M",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Verdict enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Conclusion {
    OpenPosition,
    ClosePosition,
    HoldPosition,
    StayFlat,
}

impl Conclusion {
    pub const ALL: [Conclusion; 4] = [
        Conclusion::OpenPosition,
        Conclusion::ClosePosition,
        Conclusion::HoldPosition,
        Conclusion::StayFlat,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Conclusion::OpenPosition => "Open position",
            Conclusion::ClosePosition => "Close position",
            Conclusion::HoldPosition => "Hold position",
            Conclusion::StayFlat => "Stay flat",
        }
    }
}

impl std::fmt::Display for Conclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Conclusion::OpenPosition => "OPEN_POSITION",
            Conclusion::ClosePosition => "CLOSE_POSITION",
            Conclusion::HoldPosition => "HOLD_POSITION",
            Conclusion::StayFlat => "STAY_FLAT",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Conclusion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN_POSITION" => Ok(Conclusion::OpenPosition),
            "CLOSE_POSITION" => Ok(Conclusion::ClosePosition),
            "HOLD_POSITION" => Ok(Conclusion::HoldPosition),
            "STAY_FLAT" => Ok(Conclusion::StayFlat),
            other => Err(format!("unknown conclusion '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Long, Direction::Short];

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Long => "Long",
            Direction::Short => "Short",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade plan status
// ---------------------------------------------------------------------------

/// PENDING → ACTIVE → {CLOSED, CANCELLED}, plus PENDING → CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Pending,
    Active,
    Closed,
    Cancelled,
}

impl PlanStatus {
    pub const ALL: [PlanStatus; 4] = [
        PlanStatus::Pending,
        PlanStatus::Active,
        PlanStatus::Closed,
        PlanStatus::Cancelled,
    ];

    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        matches!(
            (self, next),
            (PlanStatus::Pending, PlanStatus::Active)
                | (PlanStatus::Pending, PlanStatus::Cancelled)
                | (PlanStatus::Active, PlanStatus::Closed)
                | (PlanStatus::Active, PlanStatus::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Closed | PlanStatus::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "Pending",
            PlanStatus::Active => "Active",
            PlanStatus::Closed => "Closed",
            PlanStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanStatus::Pending => "PENDING",
            PlanStatus::Active => "ACTIVE",
            PlanStatus::Closed => "CLOSED",
            PlanStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PlanStatus::Pending),
            "ACTIVE" => Ok(PlanStatus::Active),
            "CLOSED" => Ok(PlanStatus::Closed),
            "CANCELLED" => Ok(PlanStatus::Cancelled),
            other => Err(format!("unknown plan status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Run trigger
// ---------------------------------------------------------------------------

/// What admitted a pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Cron fire of a ScheduledTask.
    Scheduled,
    /// Operator "run now".
    Manual,
    /// Cron fire of an asset's legacy schedule field.
    Legacy,
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunTrigger::Scheduled => write!(f, "scheduled"),
            RunTrigger::Manual => write!(f, "manual"),
            RunTrigger::Legacy => write!(f, "legacy"),
        }
    }
}
