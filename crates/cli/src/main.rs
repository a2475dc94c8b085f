use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use clinicdesk_core::models::{BillableGroup, NewDoctor, NewMedicine, NewPatient, NewStaff};
use clinicdesk_core::{core_config_from_env_values, Actor, ClinicServices};
use clinicdesk_types::NonEmptyText;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clinicdesk")]
#[command(about = "ClinicDesk front-desk records CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema if missing
    Init,
    /// Register a patient
    AddPatient {
        first_name: String,
        last_name: String,
        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        date_of_birth: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Register a doctor in the clinical directory
    AddDoctor {
        doctor_code: String,
        first_name: String,
        last_name: String,
        #[arg(long)]
        specialization: Option<String>,
        #[arg(long)]
        department: Option<String>,
    },
    /// Register a staff login
    AddStaff {
        staff_code: String,
        full_name: String,
        #[arg(long, default_value = "Staff")]
        role: String,
        #[arg(long)]
        department: Option<String>,
    },
    /// Add a medicine to the formulary
    AddMedicine {
        name: String,
        /// Unit price in minor currency units
        price_minor: i64,
        #[arg(long, default_value_t = 0)]
        stock: i64,
        #[arg(long)]
        description: Option<String>,
    },
    /// Add units to a medicine's stock
    Restock { medicine_id: i64, quantity: i64 },
    /// Add a symptom to the vocabulary
    AddSymptom { name: String },
    /// Add a condition to the vocabulary
    AddCondition { name: String },
    /// Show prescriptions awaiting billing
    Billable {
        #[arg(long)]
        patient_id: Option<i64>,
        /// Include lines already attached to a bill
        #[arg(long)]
        all: bool,
    },
    /// Generate a bill from a patient's unbilled prescriptions
    GenerateBill {
        patient_id: i64,
        #[arg(long)]
        staff_code: String,
        #[arg(long)]
        staff_name: String,
    },
    /// List bills, newest first
    Bills {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

fn text(field: &str, value: &str) -> anyhow::Result<NonEmptyText> {
    NonEmptyText::new(value).with_context(|| format!("{field} cannot be empty"))
}

fn money(minor: i64) -> String {
    format!("{}.{:02}", minor / 100, minor % 100)
}

fn print_groups(groups: &[BillableGroup]) {
    if groups.is_empty() {
        println!("Nothing to bill.");
        return;
    }
    for group in groups {
        println!(
            "Patient {} ({}), prescribed by {}: {}",
            group.patient_id,
            group.patient_name,
            group.doctor_name,
            money(group.total_minor)
        );
        for line in &group.prescriptions {
            let billed = line
                .bill_id
                .map(|id| format!(" [bill {id}]"))
                .unwrap_or_default();
            println!(
                "  #{} {} {} ({}) illness: {}{}",
                line.prescription_id,
                line.medicine_name,
                money(line.price_minor),
                line.dosage,
                line.illness,
                billed
            );
        }
    }
}

fn run(command: Commands, services: &ClinicServices) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            println!("Database ready.");
        }
        Commands::AddPatient {
            first_name,
            last_name,
            date_of_birth,
            gender,
            phone,
        } => {
            let date_of_birth = date_of_birth
                .as_deref()
                .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d"))
                .transpose()
                .context("date of birth must be YYYY-MM-DD")?;
            let patient = services.reference.add_patient(NewPatient {
                first_name: text("first name", &first_name)?,
                last_name: text("last name", &last_name)?,
                date_of_birth,
                gender,
                phone_number: phone,
                email: None,
                residential_address: None,
            })?;
            println!("Added patient {}: {}", patient.id, patient.full_name());
        }
        Commands::AddDoctor {
            doctor_code,
            first_name,
            last_name,
            specialization,
            department,
        } => {
            let doctor = services.reference.add_doctor(NewDoctor {
                doctor_code: text("doctor code", &doctor_code)?,
                first_name: text("first name", &first_name)?,
                last_name: text("last name", &last_name)?,
                specialization,
                department,
            })?;
            println!(
                "Added doctor {} ({}): {}",
                doctor.id,
                doctor.doctor_code,
                doctor.full_name()
            );
        }
        Commands::AddStaff {
            staff_code,
            full_name,
            role,
            department,
        } => {
            let staff = services.reference.add_staff(NewStaff {
                staff_code: text("staff code", &staff_code)?,
                full_name: text("full name", &full_name)?,
                department,
                role: text("role", &role)?,
            })?;
            println!(
                "Added staff {} ({}): {}",
                staff.id, staff.staff_code, staff.full_name
            );
        }
        Commands::AddMedicine {
            name,
            price_minor,
            stock,
            description,
        } => {
            let medicine = services.reference.add_medicine(NewMedicine {
                name: text("name", &name)?,
                price_minor,
                stock_quantity: stock,
                description,
            })?;
            println!(
                "Added medicine {}: {} at {} ({} in stock)",
                medicine.id,
                medicine.name,
                money(medicine.price_minor),
                medicine.stock_quantity
            );
        }
        Commands::Restock {
            medicine_id,
            quantity,
        } => {
            let medicine = services
                .reference
                .restock_medicine(medicine_id, quantity)?;
            println!("{} now has {} in stock", medicine.name, medicine.stock_quantity);
        }
        Commands::AddSymptom { name } => {
            let entry = services.reference.add_symptom(&name)?;
            println!("Added symptom {}: {}", entry.id, entry.name);
        }
        Commands::AddCondition { name } => {
            let entry = services.reference.add_condition(&name)?;
            println!("Added condition {}: {}", entry.id, entry.name);
        }
        Commands::Billable { patient_id, all } => {
            let groups = services.billing.list_billable(patient_id, all)?;
            print_groups(&groups);
        }
        Commands::GenerateBill {
            patient_id,
            staff_code,
            staff_name,
        } => {
            let actor = Actor::new(&staff_code, &staff_name, "Staff")?;
            let bill = services.billing.generate_bill(&actor, patient_id, None)?;
            println!(
                "Generated bill {} for {}: {} ({})",
                bill.invoice_number,
                bill.patient_name,
                money(bill.amount_minor),
                bill.status.as_str()
            );
        }
        Commands::Bills { page, limit } => {
            let page = services.billing.list_bills(page, limit)?;
            if page.bills.is_empty() {
                println!("No bills found.");
            }
            for bill in &page.bills {
                println!(
                    "{} {} {} {} {}",
                    bill.invoice_number,
                    bill.date,
                    bill.patient_name,
                    money(bill.amount_minor),
                    bill.status.as_str()
                );
            }
            println!(
                "Page {} of {} ({} bills)",
                page.current_page, page.total_pages, page.total_items
            );
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clinicdesk=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'clinicdesk --help' for commands");
        return Ok(());
    };

    let cfg = core_config_from_env_values(
        std::env::var("CLINICDESK_DB_PATH").ok(),
        std::env::var("CLINICDESK_BUSY_TIMEOUT_MS").ok(),
    )?;
    let services = ClinicServices::open(&cfg)
        .with_context(|| format!("opening {}", cfg.database_path().display()))?;

    run(command, &services)
}
