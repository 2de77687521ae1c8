//! Post-batch summary
//!
//! Outputs paying a local wallet are self-evident, so the default view lists
//! only outputs leaving the wallets. The full view prints every transaction.

use std::fmt::Write as _;

use crate::tx::SignedTx;

const TXID_WIDTH: usize = 6;
const ADDR_WIDTH: usize = 44;

/// How much of the signed batch to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryMode {
    /// Print nothing
    None,
    /// Table of non-wallet outputs
    #[default]
    Outputs,
    /// Full per-transaction view
    Full,
}

/// Render the summary for `signed`, or `None` when there is nothing to show
pub fn render(signed: &[SignedTx], mode: SummaryMode) -> Option<String> {
    if signed.is_empty() {
        return None;
    }
    match mode {
        SummaryMode::None => None,
        SummaryMode::Full => Some(render_full(signed)),
        SummaryMode::Outputs => Some(render_outputs(signed)),
    }
}

fn render_full(signed: &[SignedTx]) -> String {
    let mut out = String::from("\nAutosign summary:\n\n");
    for tx in signed {
        out.push_str(&tx.format_view());
        out.push('\n');
    }
    out
}

fn render_outputs(signed: &[SignedTx]) -> String {
    let rows: Vec<(&SignedTx, Vec<_>)> = signed
        .iter()
        .map(|tx| (tx, tx.non_wallet_outputs().collect::<Vec<_>>()))
        .filter(|(_, outputs)| !outputs.is_empty())
        .collect();

    if rows.is_empty() {
        return "No non-wallet outputs".to_string();
    }

    let mut out = String::from("\nAutosign summary:\n");
    let _ = writeln!(
        out,
        "{:<tw$}  {:<aw$} {}",
        "TX ID",
        "Non-wallet outputs",
        "Amount",
        tw = TXID_WIDTH,
        aw = ADDR_WIDTH
    );
    let _ = writeln!(
        out,
        "{}  {} {}",
        "-".repeat(TXID_WIDTH),
        "-".repeat(ADDR_WIDTH),
        "-".repeat(7)
    );

    for (tx, outputs) in rows {
        let txid = tx
            .txid()
            .map(|id| id.short())
            .unwrap_or_else(|_| "?".repeat(TXID_WIDTH));
        for (i, output) in outputs.iter().enumerate() {
            let id_col = if i == 0 { txid.as_str() } else { "" };
            let _ = writeln!(
                out,
                "{:<tw$}  {:<aw$} {} {}",
                id_col,
                output.address,
                output.amount,
                tx.tx.coin,
                tw = TXID_WIDTH,
                aw = ADDR_WIDTH
            );
        }
    }
    out
}
