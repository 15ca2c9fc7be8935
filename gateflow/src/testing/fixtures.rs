//! A small sales dataset and well-formed outputs for every model stage.

use serde_json::{json, Value};
use std::path::Path;

use crate::config::RunLayout;
use crate::errors::Result;

const CUSTOMERS_CSV: &str = "\
customer_id,name,region
1,Ada,north
2,Grace,south
3,Linus,north
";

const ORDERS_CSV: &str = "\
order_id,customers.customer_id,amount,region
10,1,12.5,north
11,2,8.0,south
12,1,4.5,north
13,3,20.0,north
";

/// Writes `customers.csv` and `orders.csv` into `data_dir`.
pub fn write_sales_dataset(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(data_dir.join("customers.csv"), CUSTOMERS_CSV)?;
    std::fs::write(data_dir.join("orders.csv"), ORDERS_CSV)?;
    Ok(())
}

/// Creates the run directories and writes the sales dataset.
pub fn prepare_run(root: &Path) -> Result<RunLayout> {
    let layout = RunLayout::new(root);
    layout.ensure()?;
    write_sales_dataset(&layout.data_dir())?;
    Ok(layout)
}

fn column(dtype: &str, unique: bool, unique_count: u64, description: &str) -> Value {
    json!({
        "type": dtype,
        "nullable": false,
        "unique": unique,
        "null_count": 0,
        "unique_count": unique_count,
        "semantic_description": description
    })
}

/// A valid `schema_interpreter` output for the sales dataset.
#[must_use]
pub fn enriched_metadata() -> Value {
    json!({
        "source_type": "csv",
        "number_of_tables": 2,
        "tables": {
            "customers": {
                "row_count": 3,
                "columns": {
                    "customer_id": column("int64", true, 3, "Customer identifier"),
                    "name": column("object", true, 3, "Customer name"),
                    "region": column("object", false, 2, "Sales region")
                },
                "primary_key": "customer_id",
                "foreign_keys": [],
                "role": "dimension",
                "description": "Customers"
            },
            "orders": {
                "row_count": 4,
                "columns": {
                    "order_id": column("int64", true, 4, "Order identifier"),
                    "customers.customer_id": column("int64", false, 3, "Buyer"),
                    "amount": column("float64", false, 4, "Order value"),
                    "region": column("object", false, 2, "Sales region")
                },
                "primary_key": "order_id",
                "foreign_keys": ["customers.customer_id"],
                "role": "fact",
                "description": "Orders"
            }
        },
        "relationships": [{
            "from_table": "orders",
            "from_column": "customers.customer_id",
            "to_table": "customers",
            "to_column": "customer_id"
        }],
        "database_domain": "retail",
        "database_description": "Customer orders"
    })
}

fn sub_analyses() -> Vec<Value> {
    vec![
        json!({
            "id": "1.1",
            "title": "Revenue by region",
            "why": "Where sales come from",
            "answers": ["Which region sells most?"],
            "tables_columns": ["orders.region", "orders.amount"]
        }),
        json!({
            "id": "1.2",
            "title": "Largest orders",
            "why": "Key accounts",
            "answers": ["What are the biggest orders?"],
            "tables_columns": ["orders.amount"]
        }),
    ]
}

fn analysis(subs: Vec<Value>) -> Value {
    json!({
        "analyses": [{
            "id": "1",
            "title": "Sales",
            "context": "Sales performance",
            "tables": ["orders"],
            "sub_analyses": subs
        }]
    })
}

/// A valid `business_analyst` output.
#[must_use]
pub fn business_analysis() -> Value {
    analysis(sub_analyses())
}

const QUERY_CODE: [&[&str]; 2] = [
    &[
        "totals = orders.groupby('region')['amount'].sum()",
        "result = totals.reset_index()",
    ],
    &["result = orders.nlargest(2, 'amount')"],
];

fn with_code(include_charts: bool) -> Value {
    let subs = sub_analyses()
        .into_iter()
        .zip(QUERY_CODE)
        .map(|(mut sub, code)| {
            if let Some(obj) = sub.as_object_mut() {
                obj.insert("type".into(), json!("aggregation"));
                obj.insert("code_lines".into(), json!(code));
                if include_charts {
                    obj.insert(
                        "visualization_code".into(),
                        json!(["plt.bar(result['region'], result['amount'])", "result_plot = plt.gcf()"]),
                    );
                    obj.insert("visualization_type".into(), json!("bar"));
                    obj.insert("justification".into(), json!("Compare categories"));
                }
            }
            sub
        })
        .collect();
    analysis(subs)
}

/// A valid `query_builder` output whose code runs against the dataset.
#[must_use]
pub fn queries() -> Value {
    with_code(false)
}

/// A valid `visualization_designer` or `mono_agent` output whose code runs
/// against the dataset.
#[must_use]
pub fn visualizations() -> Value {
    with_code(true)
}

/// A valid `confidentiality_tester` output.
#[must_use]
pub fn confidentiality_test() -> Value {
    json!({
        "verdict": "PASS",
        "summary": "No raw values exposed",
        "data_exposure_count": 0,
        "total_questions": 1,
        "questions": [{
            "id": "q1",
            "question": "What did Ada spend?",
            "answer": "Not disclosed",
            "reveals_data": false,
            "explanation": "Only aggregates are shown"
        }]
    })
}
