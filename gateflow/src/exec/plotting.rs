//! Plotting calls. Everything draws into the namespace's current figure.

use indexmap::IndexMap;

use crate::exec::chart::{ChartKind, ChartSeries};
use crate::exec::error::{ExecError, ExecResult};
use crate::exec::interpreter::{Args, Interpreter};
use crate::exec::table::{numeric_values, Column, Table};
use crate::exec::value::{Cell, CellKey, Value};

const DEFAULT_BINS: usize = 10;

/// Calls that only affect layout or styling.
fn is_cosmetic(name: &str) -> bool {
    matches!(
        name,
        "xticks"
            | "yticks"
            | "legend"
            | "tight_layout"
            | "grid"
            | "show"
            | "close"
            | "savefig"
            | "tick_params"
            | "xlim"
            | "ylim"
            | "subplots_adjust"
            | "axis"
            | "text"
            | "annotate"
            | "axhline"
            | "axvline"
            | "set_xticks"
            | "set_yticks"
            | "set_xticklabels"
            | "set_yticklabels"
            | "set_xlim"
            | "set_ylim"
            | "bar_label"
            | "margins"
            | "invert_yaxis"
            | "set_size_inches"
            | "set_facecolor"
            | "autofmt_xdate"
            | "colorbar"
    )
}

fn cells(v: &Value) -> ExecResult<Vec<Cell>> {
    match v {
        Value::Column(c) => Ok(c.values.clone()),
        other => other.to_cells(),
    }
}

fn label_of(cell: &Cell) -> String {
    match cell {
        Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
        other => other.to_string(),
    }
}

fn numbers(v: &[Cell], op: &str) -> ExecResult<Vec<f64>> {
    v.iter()
        .map(|c| {
            if c.is_null() {
                return Ok(f64::NAN);
            }
            c.as_f64().ok_or_else(|| {
                ExecError::type_error(format!(
                    "{op}: cannot plot non-numeric value '{c}'"
                ))
            })
        })
        .collect()
}

/// A series over `xs`, categorical unless every x is numeric.
fn xy_series(kind: ChartKind, xs: &[Cell], ys: &[Cell], op: &str) -> ExecResult<ChartSeries> {
    if xs.len() != ys.len() {
        return Err(ExecError::value(format!(
            "x and y must have same first dimension, but have shapes ({},) and ({},)",
            xs.len(),
            ys.len()
        )));
    }
    let y = numbers(ys, op)?;
    if xs.iter().all(|c| c.is_numeric() || c.is_null()) && kind != ChartKind::Bar && kind != ChartKind::BarH {
        Ok(ChartSeries::numeric(kind, numbers(xs, op)?, y))
    } else {
        Ok(ChartSeries::categorical(kind, xs.iter().map(label_of).collect(), y))
    }
}

fn series_label(args: &Args) -> Option<String> {
    args.opt_string(usize::MAX, "label")
}

/// Draws one matplotlib-style call into the current figure.
fn draw(interp: &mut Interpreter<'_>, name: &str, args: &Args) -> ExecResult<Option<Value>> {
    let series = match name {
        "bar" | "barh" => {
            let kind = if name == "bar" { ChartKind::Bar } else { ChartKind::BarH };
            let xs = cells(args.require(0, if name == "bar" { "x" } else { "y" }, name)?)?;
            let heights = args.require(1, if name == "bar" { "height" } else { "width" }, name)?;
            let ys = match heights {
                Value::Scalar(c) => vec![c.clone(); xs.len()],
                other => cells(other)?,
            };
            xy_series(kind, &xs, &ys, name)?
        }
        "plot" => {
            let first = cells(args.require(0, "x", name)?)?;
            match args.positional.get(1).filter(|v| v.as_str().is_none()) {
                Some(ys) => xy_series(ChartKind::Line, &first, &cells(ys)?, name)?,
                None => {
                    #[allow(clippy::cast_precision_loss)]
                    let xs: Vec<f64> = (0..first.len()).map(|i| i as f64).collect();
                    ChartSeries::numeric(ChartKind::Line, xs, numbers(&first, name)?)
                }
            }
        }
        "scatter" => {
            let xs = cells(args.require(0, "x", name)?)?;
            let ys = cells(args.require(1, "y", name)?)?;
            xy_series(ChartKind::Scatter, &xs, &ys, name)?
        }
        "pie" => {
            let values = cells(args.require(0, "x", name)?)?;
            let labels = match args.kw("labels") {
                Some(v) => cells(v)?.iter().map(label_of).collect(),
                None => (0..values.len()).map(|i| i.to_string()).collect(),
            };
            ChartSeries::categorical(ChartKind::Pie, labels, numbers(&values, name)?)
        }
        "hist" => {
            let values = cells(args.require(0, "x", name)?)?;
            let bins = args.count(1, "bins", DEFAULT_BINS)?;
            ChartSeries::histogram(&numeric_values(&values, name)?, bins)
        }
        _ => return Ok(None),
    };
    interp
        .namespace()
        .figure_mut()
        .push(series.with_label(series_label(args)));
    Ok(Some(Value::Axes))
}

fn set_text(interp: &mut Interpreter<'_>, field: &str, args: &Args) -> ExecResult<Value> {
    let text = args.string(0, "label", field)?;
    let figure = interp.namespace().figure_mut();
    match field {
        "title" => figure.title = Some(text),
        "xlabel" => figure.xlabel = Some(text),
        _ => figure.ylabel = Some(text),
    }
    Ok(Value::NONE)
}

/// `plt.<name>(...)`.
pub fn pyplot(interp: &mut Interpreter<'_>, name: &str, args: &Args) -> ExecResult<Value> {
    if let Some(axes) = draw(interp, name, args)? {
        return Ok(axes);
    }
    match name {
        "figure" => {
            interp.namespace().new_figure();
            Ok(Value::Figure)
        }
        "subplots" => {
            interp.namespace().new_figure();
            Ok(Value::List(vec![Value::Figure, Value::Axes]))
        }
        "title" | "suptitle" => set_text(interp, "title", args),
        "xlabel" | "ylabel" => set_text(interp, name, args),
        "gcf" => Ok(Value::Figure),
        "gca" | "subplot" => Ok(Value::Axes),
        cosmetic if is_cosmetic(cosmetic) => Ok(Value::NONE),
        other => Err(ExecError::runtime(format!(
            "module 'matplotlib.pyplot' has no attribute '{other}'"
        ))),
    }
}

/// `ax.<name>(...)`.
pub fn axes_method(interp: &mut Interpreter<'_>, name: &str, args: &Args) -> ExecResult<Value> {
    if let Some(axes) = draw(interp, name, args)? {
        return Ok(axes);
    }
    match name {
        "set_title" => set_text(interp, "title", args),
        "set_xlabel" => set_text(interp, "xlabel", args),
        "set_ylabel" => set_text(interp, "ylabel", args),
        "set" => {
            apply_plot_text(interp, args)?;
            Ok(Value::NONE)
        }
        "get_figure" => Ok(Value::Figure),
        "twinx" | "twiny" => Ok(Value::Axes),
        cosmetic if is_cosmetic(cosmetic) => Ok(Value::NONE),
        other => Err(ExecError::no_attribute("Axes", other)),
    }
}

/// `fig.<name>(...)`.
pub fn figure_method(interp: &mut Interpreter<'_>, name: &str, args: &Args) -> ExecResult<Value> {
    match name {
        "suptitle" => set_text(interp, "title", args),
        "add_subplot" | "gca" | "add_axes" => Ok(Value::Axes),
        cosmetic if is_cosmetic(cosmetic) => Ok(Value::NONE),
        other => Err(ExecError::no_attribute("Figure", other)),
    }
}

/// Resolves a seaborn `x=`/`y=` argument against `data`.
fn sns_column(data: Option<&Table>, args: &Args, index: usize, name: &str) -> ExecResult<Option<Vec<Cell>>> {
    match (args.opt(index, name), data) {
        (Some(Value::Scalar(Cell::Str(col))), Some(table)) => Ok(Some(table.column(col)?.values.clone())),
        (Some(v), _) => cells(v).map(Some),
        (None, _) => Ok(None),
    }
}

/// Mean of `ys` per distinct x, in order of first appearance.
fn mean_by(xs: &[Cell], ys: &[Cell]) -> ExecResult<(Vec<Cell>, Vec<f64>)> {
    let mut groups: IndexMap<CellKey, (Cell, f64, usize)> = IndexMap::new();
    for (x, y) in xs.iter().zip(ys) {
        if x.is_null() {
            continue;
        }
        let Some(v) = y.as_f64() else { continue };
        let entry = groups.entry(x.require_key()?).or_insert_with(|| (x.clone(), 0.0, 0));
        entry.1 += v;
        entry.2 += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let means = groups
        .into_values()
        .map(|(x, total, n)| (x, total / n as f64))
        .unzip();
    Ok(means)
}

/// `sns.<name>(...)`.
pub fn seaborn(interp: &mut Interpreter<'_>, name: &str, args: &Args) -> ExecResult<Value> {
    let data = match args.kw("data") {
        Some(Value::Table(t)) => Some(t.clone()),
        Some(other) => {
            return Err(ExecError::type_error(format!(
                "data must be a DataFrame, got '{}'",
                other.type_name()
            )))
        }
        None => None,
    };
    let x = sns_column(data.as_ref(), args, usize::MAX, "x")?;
    let y = sns_column(data.as_ref(), args, usize::MAX, "y")?;
    let missing = |axis: &str| ExecError::value(format!("{name} requires '{axis}'"));
    let series = match name {
        "barplot" => {
            let (x, y) = (x.ok_or_else(|| missing("x"))?, y.ok_or_else(|| missing("y"))?);
            if x.iter().all(|c| c.is_numeric() || c.is_null()) && !y.iter().all(|c| c.is_numeric() || c.is_null()) {
                let (cats, means) = mean_by(&y, &x)?;
                ChartSeries::categorical(ChartKind::BarH, cats.iter().map(label_of).collect(), means)
            } else {
                let (cats, means) = mean_by(&x, &y)?;
                ChartSeries::categorical(ChartKind::Bar, cats.iter().map(label_of).collect(), means)
            }
        }
        "lineplot" => {
            let (x, y) = (x.ok_or_else(|| missing("x"))?, y.ok_or_else(|| missing("y"))?);
            let (xs, means) = mean_by(&x, &y)?;
            let mut points: Vec<(Cell, f64)> = xs.into_iter().zip(means).collect();
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
            let (xs, ys): (Vec<Cell>, Vec<f64>) = points.into_iter().unzip();
            let ys: Vec<Cell> = ys.into_iter().map(Cell::Float).collect();
            xy_series(ChartKind::Line, &xs, &ys, name)?
        }
        "scatterplot" => {
            let (x, y) = (x.ok_or_else(|| missing("x"))?, y.ok_or_else(|| missing("y"))?);
            xy_series(ChartKind::Scatter, &x, &y, name)?
        }
        "histplot" => {
            let values = x.or(y).ok_or_else(|| missing("x"))?;
            let bins = args.count(usize::MAX, "bins", DEFAULT_BINS)?;
            ChartSeries::histogram(&numeric_values(&values, name)?, bins)
        }
        "countplot" => {
            let values = x.ok_or_else(|| missing("x"))?;
            let mut counts: IndexMap<CellKey, (Cell, f64)> = IndexMap::new();
            for v in values.iter().filter(|v| !v.is_null()) {
                counts.entry(v.require_key()?).or_insert_with(|| (v.clone(), 0.0)).1 += 1.0;
            }
            let (cats, ns): (Vec<String>, Vec<f64>) =
                counts.into_values().map(|(c, n)| (label_of(&c), n)).unzip();
            ChartSeries::categorical(ChartKind::Bar, cats, ns)
        }
        "set" | "set_theme" | "set_style" | "set_palette" | "set_context" | "despine" | "color_palette" => {
            return Ok(Value::NONE)
        }
        other => {
            return Err(ExecError::runtime(format!(
                "module 'seaborn' has no attribute '{other}'"
            )))
        }
    };
    interp.namespace().figure_mut().push(series);
    Ok(Value::Axes)
}

fn plot_kind(args: &Args) -> ExecResult<ChartKind> {
    match args.opt_string(usize::MAX, "kind") {
        None => Ok(ChartKind::Line),
        Some(kind) => ChartKind::parse(&kind)
            .ok_or_else(|| ExecError::value(format!("{kind} is not a valid plot kind"))),
    }
}

fn apply_plot_text(interp: &mut Interpreter<'_>, args: &Args) -> ExecResult<()> {
    for field in ["title", "xlabel", "ylabel"] {
        if let Some(v) = args.kw(field) {
            set_text(interp, field, &Args::positional(vec![v.clone()]))?;
        }
    }
    Ok(())
}

/// `df.plot(kind=..., x=..., y=...)`.
pub fn table_plot(interp: &mut Interpreter<'_>, t: &Table, args: &Args) -> ExecResult<Value> {
    let kind = plot_kind(args)?;
    let x_name = args.opt_string(usize::MAX, "x");
    let xs: Vec<Cell> = match &x_name {
        Some(name) => t.column(name)?.values.clone(),
        None => (0..t.row_count())
            .map(|r| Cell::Int(i64::try_from(r).unwrap_or(i64::MAX)))
            .collect(),
    };
    let y_names = match args.opt(usize::MAX, "y") {
        Some(v) => v.to_names()?,
        None => t
            .columns
            .iter()
            .filter(|c| c.is_numeric() && Some(&c.name) != x_name.as_ref())
            .map(|c| c.name.clone())
            .collect(),
    };
    if y_names.is_empty() {
        return Err(ExecError::type_error("no numeric data to plot"));
    }
    for y in &y_names {
        let ys = &t.column(y)?.values;
        let series = match kind {
            ChartKind::Hist => ChartSeries::histogram(&numeric_values(ys, "hist")?, args.count(usize::MAX, "bins", DEFAULT_BINS)?),
            ChartKind::Pie => ChartSeries::categorical(kind, xs.iter().map(label_of).collect(), numbers(ys, "pie")?),
            _ => xy_series(kind, &xs, ys, "plot")?,
        };
        interp
            .namespace()
            .figure_mut()
            .push(series.with_label(Some(y.clone())));
    }
    apply_plot_text(interp, args)?;
    Ok(Value::Axes)
}

/// `series.plot(kind=...)`: index labels on x, values on y.
pub fn column_plot(interp: &mut Interpreter<'_>, c: &Column, args: &Args) -> ExecResult<Value> {
    let kind = plot_kind(args)?;
    let series = match kind {
        ChartKind::Hist => ChartSeries::histogram(
            &numeric_values(&c.values, "hist")?,
            args.count(usize::MAX, "bins", DEFAULT_BINS)?,
        ),
        _ => {
            let labels: Vec<Cell> = (0..c.len()).map(|r| c.label_cell(r)).collect();
            if c.index.is_some() || matches!(kind, ChartKind::Pie) {
                ChartSeries::categorical(kind, labels.iter().map(label_of).collect(), numbers(&c.values, "plot")?)
            } else {
                xy_series(kind, &labels, &c.values, "plot")?
            }
        }
    };
    let label = (!c.name.is_empty()).then(|| c.name.clone());
    interp.namespace().figure_mut().push(series.with_label(label));
    apply_plot_text(interp, args)?;
    Ok(Value::Axes)
}

#[cfg(test)]
mod tests {
    use crate::exec::chart::ChartKind;
    use crate::exec::interpreter::execute;
    use crate::exec::namespace::ExecutionNamespace;
    use crate::exec::table::Table;
    use crate::exec::value::{Cell, Value};
    use pretty_assertions::assert_eq;

    fn ns() -> ExecutionNamespace {
        let sales = Table::from_pairs(vec![
            (
                "region".to_string(),
                vec![
                    Cell::Str("north".into()),
                    Cell::Str("south".into()),
                    Cell::Str("north".into()),
                ],
            ),
            ("revenue".to_string(), vec![Cell::Int(10), Cell::Int(4), Cell::Int(6)]),
        ])
        .unwrap();
        ExecutionNamespace::from_tables(vec![("sales".to_string(), sales)])
    }

    #[test]
    fn test_pyplot_bar_with_labels() {
        let mut ns = ns();
        execute(
            "fig, ax = plt.subplots(figsize=(8, 5))\n\
             totals = sales.groupby('region')['revenue'].sum()\n\
             ax.bar(totals.index, totals.values)\n\
             ax.set_title('Revenue by region')\n\
             plt.xticks(rotation=45)\n\
             plt.tight_layout()\n\
             result_plot = fig",
            &mut ns,
        )
        .unwrap();
        let chart = ns.result_plot().unwrap();
        assert_eq!(chart.kind(), Some(ChartKind::Bar));
        assert_eq!(chart.title.as_deref(), Some("Revenue by region"));
        assert_eq!(chart.series[0].categories, vec!["north", "south"]);
        assert_eq!(chart.series[0].y, vec![16.0, 4.0]);
    }

    #[test]
    fn test_seaborn_barplot_means() {
        let mut ns = ns();
        execute(
            "ax = sns.barplot(data=sales, x='region', y='revenue')\nresult_plot = ax",
            &mut ns,
        )
        .unwrap();
        let chart = ns.result_plot().unwrap();
        assert_eq!(chart.series[0].y, vec![8.0, 4.0]);
    }

    #[test]
    fn test_series_plot_kind() {
        let mut ns = ns();
        execute(
            "ax = sales['region'].value_counts().plot(kind='pie', title='Share')\nresult_plot = ax.figure",
            &mut ns,
        )
        .unwrap();
        let chart = ns.result_plot().unwrap();
        assert_eq!(chart.kind(), Some(ChartKind::Pie));
        assert_eq!(chart.title.as_deref(), Some("Share"));
    }

    #[test]
    fn test_new_figure_discards_old_series() {
        let mut ns = ns();
        execute("plt.plot([1, 2, 3])\nplt.figure()\nplt.hist(sales['revenue'], bins=2)", &mut ns).unwrap();
        assert_eq!(ns.figure().series.len(), 1);
        assert_eq!(ns.figure().kind(), Some(ChartKind::Hist));
    }

    #[test]
    fn test_result_plot_must_be_a_figure() {
        let mut ns = ns();
        execute("result_plot = 'chart'", &mut ns).unwrap();
        assert!(ns.result_plot().is_none());
        assert!(matches!(ns.get("result_plot"), Some(Value::Scalar(_))));
    }

    #[test]
    fn test_unknown_seaborn_function() {
        let mut ns = ns();
        let err = execute("sns.violinplot(data=sales, x='region')", &mut ns).unwrap_err();
        assert_eq!(err.to_string(), "module 'seaborn' has no attribute 'violinplot'");
    }
}
