//! 内置静态结构描述（客户端模式或无法自省时使用），可由文件覆盖

use std::path::Path;

const PRODUCT_DATA: &[(&str, &str)] = &[
    ("Branchname", "NVARCHAR"),
    ("Productid", "BIGINT"),
    ("ProductName", "NVARCHAR"),
    ("stock", "NUMERIC"),
    ("ProductRate", "MONEY"),
    ("CATEGORY", "NVARCHAR"),
    ("BRAND", "NVARCHAR"),
    ("MODEL", "NVARCHAR"),
    ("COLOR", "NVARCHAR"),
    ("SUBCATEGORY", "VARCHAR"),
    ("FABRIC", "VARCHAR"),
    ("SIZE", "VARCHAR"),
    ("SHADE", "VARCHAR"),
    ("DEPARTMENT", "VARCHAR"),
    ("STYLE", "VARCHAR"),
    ("ReorderLevel", "DECIMAL"),
    ("ReorderQuantity", "DECIMAL"),
    ("LastPurchaseDate", "DATETIME"),
    ("CPU", "MONEY"),
    ("LastPurchasedHowManyDaysAgo", "INT"),
    ("Supplier", "NVARCHAR"),
];

const SALES_DATA: &[(&str, &str)] = &[
    ("branchid", "INT"),
    ("BranchName", "NVARCHAR"),
    ("Productid", "BIGINT"),
    ("productname", "NVARCHAR"),
    ("SaleBillNumber", "BIGINT"),
    ("SaleBillDate", "DATETIME"),
    ("SaleQuantity", "NUMERIC"),
    ("SaleRate", "MONEY"),
    ("SaleDiscountAmount", "FLOAT"),
    ("SaleTaxAmount", "MONEY"),
    ("SaleAmount", "MONEY"),
    ("SaleCustomerName", "NVARCHAR"),
    ("SaleCustomerCity", "NVARCHAR"),
    ("Salesman", "NVARCHAR"),
    ("BeforeTaxSaleAmount", "MONEY"),
];

/// 内置的零售分析库结构（ProductData / SalesData）
pub fn builtin_schema() -> String {
    let mut text = String::from("Database Schema:\n");
    for (table, columns) in [("ProductData", PRODUCT_DATA), ("SalesData", SALES_DATA)] {
        text.push_str(&format!("\nTable: {table}\n"));
        for (name, ty) in columns {
            text.push_str(&format!("- {name} ({ty})\n"));
        }
    }
    text
}

/// 读取结构描述文件；未配置、不可读或为空时使用内置描述
pub fn load_static_schema(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return builtin_schema();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "static schema file is empty, using built-in schema");
            builtin_schema()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read static schema file, using built-in schema");
            builtin_schema()
        }
    }
}
