//! 注入沙箱的辅助模块源码
//!
//! 模型生成的脚本可 `from compute_metrics import compute_metrics`，
//! 用同一套口径计算回测指标（年化按 252 个交易日）。

/// compute_metrics 返回的指标键
pub const METRIC_KEYS: &[&str] = &[
    "total_return",
    "sharpe_ratio",
    "max_drawdown",
    "volatility",
    "cagr",
    "sortino_ratio",
    "calmar_ratio",
];

pub const COMPUTE_METRICS_SOURCE: &str = r#""""Backtest metric helpers available inside the sandbox workspace.

    from compute_metrics import compute_metrics
    metrics = compute_metrics(portfolio_values, initial_capital=100000)
"""
import math

import numpy as np
import pandas as pd

TRADING_DAYS = 252
METRIC_KEYS = (
    "total_return",
    "sharpe_ratio",
    "max_drawdown",
    "volatility",
    "cagr",
    "sortino_ratio",
    "calmar_ratio",
)


def _finite(x):
    try:
        x = float(x)
    except (TypeError, ValueError):
        return 0.0
    return x if math.isfinite(x) else 0.0


def compute_metrics(portfolio_values, initial_capital=100000.0):
    """Return a dict of standard metrics for a daily portfolio value series."""
    values = pd.Series(portfolio_values, dtype="float64").dropna()
    if values.empty or initial_capital <= 0:
        return {k: 0.0 for k in METRIC_KEYS}

    returns = values.pct_change().dropna()
    total_return = values.iloc[-1] / initial_capital - 1.0

    std = returns.std() if len(returns) > 1 else 0.0
    sharpe = returns.mean() / std * np.sqrt(TRADING_DAYS) if std > 0 else 0.0
    volatility = std * np.sqrt(TRADING_DAYS)

    running_max = values.cummax()
    max_drawdown = ((values - running_max) / running_max).min()

    years = len(returns) / TRADING_DAYS
    if years > 0 and total_return > -1.0:
        cagr = (1.0 + total_return) ** (1.0 / years) - 1.0
    else:
        cagr = 0.0

    downside = returns[returns < 0]
    downside_std = downside.std() if len(downside) > 1 else 0.0
    sortino = returns.mean() / downside_std * np.sqrt(TRADING_DAYS) if downside_std > 0 else 0.0
    calmar = cagr / abs(max_drawdown) if max_drawdown < 0 else 0.0

    metrics = {
        "total_return": total_return,
        "sharpe_ratio": sharpe,
        "max_drawdown": max_drawdown,
        "volatility": volatility,
        "cagr": cagr,
        "sortino_ratio": sortino,
        "calmar_ratio": calmar,
    }
    return {k: _finite(v) for k, v in metrics.items()}
"#;
