// Copyright (c) 2024 Botho Foundation

//! Supported asset tickers.
//!
//! The set only grows: each ticker belongs to a [`TickerTier`] that becomes
//! valid at an activation height. A ticker's one-byte code is its storage key
//! and never changes once assigned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// When a ticker joined the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TickerTier {
    Genesis,
    V4,
    V5,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown ticker: {0}")]
pub struct UnknownTicker(pub String);

macro_rules! tickers {
    ($($variant:ident = $code:literal, $symbol:literal, $tier:ident;)*) => {
        /// An asset tracked by the ledger. `Peg` is the anchor asset.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        #[repr(u8)]
        pub enum Ticker {
            $($variant = $code,)*
        }

        impl Ticker {
            /// Every ticker, ordered by code.
            pub const ALL: &'static [Ticker] = &[$(Ticker::$variant,)*];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Ticker::$variant => $symbol,)*
                }
            }

            pub fn tier(self) -> TickerTier {
                match self {
                    $(Ticker::$variant => TickerTier::$tier,)*
                }
            }

            /// Look up a ticker by its storage code.
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(Ticker::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

tickers! {
    Peg = 0, "PEG", Genesis;
    PUsd = 1, "pUSD", Genesis;
    PEur = 2, "pEUR", Genesis;
    PJpy = 3, "pJPY", Genesis;
    PGbp = 4, "pGBP", Genesis;
    PCad = 5, "pCAD", Genesis;
    PChf = 6, "pCHF", Genesis;
    PInr = 7, "pINR", Genesis;
    PSgd = 8, "pSGD", Genesis;
    PCny = 9, "pCNY", Genesis;
    PHkd = 10, "pHKD", Genesis;
    PKrw = 11, "pKRW", Genesis;
    PBrl = 12, "pBRL", Genesis;
    PPhp = 13, "pPHP", Genesis;
    PMxn = 14, "pMXN", Genesis;
    PXau = 15, "pXAU", Genesis;
    PXag = 16, "pXAG", Genesis;
    PXbt = 17, "pXBT", Genesis;
    PEth = 18, "pETH", Genesis;
    PLtc = 19, "pLTC", Genesis;
    PRvn = 20, "pRVN", Genesis;
    PXbc = 21, "pXBC", Genesis;
    PFct = 22, "pFCT", Genesis;
    PBnb = 23, "pBNB", Genesis;
    PXlm = 24, "pXLM", Genesis;
    PAda = 25, "pADA", Genesis;
    PXmr = 26, "pXMR", Genesis;
    PDash = 27, "pDASH", Genesis;
    PZec = 28, "pZEC", Genesis;
    PDcr = 29, "pDCR", Genesis;
    PAud = 30, "pAUD", V4;
    PNzd = 31, "pNZD", V4;
    PSek = 32, "pSEK", V4;
    PNok = 33, "pNOK", V4;
    PRub = 34, "pRUB", V4;
    PZar = 35, "pZAR", V4;
    PTry = 36, "pTRY", V4;
    PEos = 37, "pEOS", V4;
    PLink = 38, "pLINK", V4;
    PAtom = 39, "pATOM", V4;
    PBat = 40, "pBAT", V4;
    PXtz = 41, "pXTZ", V4;
    PHbar = 42, "pHBAR", V5;
    PNeo = 43, "pNEO", V5;
    PCro = 44, "pCRO", V5;
    PEtc = 45, "pETC", V5;
    POnt = 46, "pONT", V5;
    PDoge = 47, "pDOGE", V5;
    PVet = 48, "pVET", V5;
    PHt = 49, "pHT", V5;
    PAlgo = 50, "pALGO", V5;
    PDgb = 51, "pDGB", V5;
}

impl Ticker {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl FromStr for Ticker {
    type Err = UnknownTicker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ticker::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTicker(s.to_string()))
    }
}

impl TryFrom<String> for Ticker {
    type Error = UnknownTicker;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ticker> for &'static str {
    fn from(t: Ticker) -> Self {
        t.as_str()
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
