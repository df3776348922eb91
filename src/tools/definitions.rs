use serde_json::{Value, json};

pub const QUERY_DATABASE: &str = "query_database";
pub const CALCULATE_TAXES: &str = "calculate_taxes";

/// Function definitions offered to the model on the first turn
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": QUERY_DATABASE,
                "description": "Consulta los datos del negocio del usuario: resumen financiero, clientes, facturas, proyectos, gastos o inventario.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query_type": {
                            "type": "string",
                            "enum": ["financial_summary", "clients", "invoices", "projects", "expenses", "inventory"],
                            "description": "Tipo de información a consultar"
                        },
                        "filters": {
                            "type": "object",
                            "description": "Filtros opcionales",
                            "properties": {
                                "date_from": { "type": "string", "description": "Fecha inicial (YYYY-MM-DD)" },
                                "date_to": { "type": "string", "description": "Fecha final (YYYY-MM-DD)" },
                                "status": { "type": "string", "description": "Estado (paid, pending, draft, in_progress...)" },
                                "client_id": { "type": "string", "description": "ID del cliente" }
                            }
                        }
                    },
                    "required": ["query_type"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": CALCULATE_TAXES,
                "description": "Calcula impuestos colombianos: IVA (19%), retención en la fuente, ReteIVA (50% del IVA), ReteICA (0.5%) o todas las deducciones juntas.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "base_amount": { "type": "number", "description": "Valor base antes de impuestos" },
                        "calculation_type": {
                            "type": "string",
                            "enum": ["iva", "retefuente", "reteiva", "reteica", "todas"],
                            "description": "Tipo de cálculo"
                        },
                        "retention_concept": {
                            "type": "string",
                            "enum": ["compras", "servicios", "arrendamientos", "transporte"],
                            "description": "Concepto para la retención en la fuente (por defecto servicios)"
                        },
                        "is_iva_responsible": {
                            "type": "boolean",
                            "description": "Si el tercero es responsable de IVA (aplica ReteIVA)"
                        }
                    },
                    "required": ["base_amount", "calculation_type"]
                }
            }
        }),
    ]
}
